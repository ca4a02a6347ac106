//! Command execution.

use crate::{Commands, Layout, MaskCommand};
use anisync_client::{SyncClient, UdpSocketAdapter};
use anisync_core::{
    CatalogRecord, CatalogStore, EngineEvent, EnqueueResult, MemoryCatalog, MemoryPacketStore,
    MylistAdd, RecordKind,
};
use anisync_protocol::{FieldMask, MaskCodec, ReplyCode, FILE_AMASK, FILE_FMASK};
use colored::Colorize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::error::Error;
use std::time::{Duration, Instant};

type Client = SyncClient<UdpSocketAdapter, MemoryPacketStore, MemoryCatalog>;
type CmdResult = Result<String, Box<dyn Error>>;

const DEFAULT_ANIME_FIELDS: &[&str] = &[
    "aid",
    "year",
    "type",
    "romaji_name",
    "english_name",
    "episodes",
    "air_date",
    "end_date",
    "rating",
    "vote_count",
];

const DEFAULT_FILE_FIELDS: &[&str] = &[
    "aid",
    "eid",
    "gid",
    "mylist_id",
    "state",
    "size",
    "ed2k",
    "crc32",
    "quality",
    "video_resolution",
    "dub_language",
    "sub_language",
];

const DEFAULT_FILE_ANIME_FIELDS: &[&str] = &["romaji_name", "epno", "ep_name", "group_name"];

/// Runs a mask tool.
pub fn mask(command: &MaskCommand) -> CmdResult {
    match command {
        MaskCommand::Encode { layout, fields } => {
            let layout = layout.fields();
            let mask = MaskCodec::encode(layout, fields)?;
            Ok(format!(
                "{} ({} fields)",
                layout.render(&mask).cyan(),
                mask.count_ones()
            ))
        }

        MaskCommand::Decode { layout, mask } => {
            let mask = parse_mask(*layout, mask)?;
            let layout = layout.fields();
            let mut output = format!("{}\n", layout.render(&mask).cyan());
            for bit in mask.set_bits() {
                let single = layout.render(&FieldMask::empty().with_bit(bit));
                match layout.field_at(bit) {
                    Some(name) => output.push_str(&format!("  {}  {}\n", single.dimmed(), name)),
                    None => output.push_str(&format!(
                        "  {}  {}\n",
                        single.dimmed(),
                        "(retired)".yellow()
                    )),
                }
            }
            Ok(output.trim_end().to_string())
        }

        MaskCommand::Fields { layout } => {
            let layout = layout.fields();
            let all = layout.all_fields();
            let mut output = format!(
                "{} ({} bytes, {} fields)\n",
                layout.name().bold(),
                layout.width(),
                all.count_ones()
            );
            for bit in all.set_bits() {
                let single = layout.render(&FieldMask::empty().with_bit(bit));
                output.push_str(&format!(
                    "  {}  {}\n",
                    single.dimmed(),
                    layout.field_at(bit).unwrap_or_default()
                ));
            }
            Ok(output.trim_end().to_string())
        }

        MaskCommand::Apply {
            layout,
            mask,
            line,
            truncated,
        } => {
            let mask = parse_mask(*layout, mask)?;
            let layout = layout.fields();
            let tokens: Vec<&str> = line.split('|').collect();
            let outcome = MaskCodec::decode(layout, &tokens, &mask, 0);

            let mut output = String::new();
            for name in layout.fields_in(&mask) {
                match outcome.fields.get(name) {
                    Some(value) => output.push_str(&format!("{}: {}\n", name.cyan(), value)),
                    None => output.push_str(&format!("{}: {}\n", name.cyan(), "-".dimmed())),
                }
            }
            if outcome.next_index < tokens.len() {
                output.push_str(&format!(
                    "{}\n",
                    format!("{} extra tokens", tokens.len() - outcome.next_index).yellow()
                ));
            }
            if *truncated {
                let reduced = MaskCodec::reduced_mask(&mask, &outcome.consumed);
                if reduced.is_empty() {
                    output.push_str(&format!("{}\n", "Nothing missing".green()));
                } else {
                    output.push_str(&format!(
                        "{} {}\n",
                        "Follow-up mask:".yellow(),
                        layout.render(&reduced)
                    ));
                }
            }
            Ok(output.trim_end().to_string())
        }
    }
}

fn parse_mask(layout: Layout, text: &str) -> Result<FieldMask, Box<dyn Error>> {
    let layout = layout.fields();
    let mask = layout.parse(text);
    if mask.is_empty() && !text.chars().all(|c| c == '0') {
        return Err(format!("'{}' is not a {} mask", text, layout.name()).into());
    }
    Ok(mask)
}

/// Runs a network command and renders its outcome.
pub async fn execute(
    client: &mut Client,
    catalog: &MemoryCatalog,
    command: Commands,
    timeout: Duration,
    json: bool,
) -> CmdResult {
    match command {
        Commands::Mask { command } => mask(&command),

        Commands::Ping => {
            let start = Instant::now();
            let tag = queued(client.engine_mut().ping()?)?;
            let outcome = wait(client, tag, timeout).await?;
            match outcome.last_code() {
                Some(ReplyCode::Pong) => Ok(format!(
                    "{} ({:.1}ms)",
                    "PONG".green(),
                    start.elapsed().as_secs_f64() * 1000.0
                )),
                Some(code) => Err(format!("unexpected reply {}", code).into()),
                None => Err("no reply".into()),
            }
        }

        Commands::Anime { aid, fields } => {
            let mask = match fields {
                Some(fields) => MaskCodec::encode(Layout::Anime.fields(), &fields)?,
                None => MaskCodec::encode(Layout::Anime.fields(), DEFAULT_ANIME_FIELDS)?,
            };
            let result = client.engine_mut().request_anime(aid, &mask)?;
            lookup(client, catalog, result, timeout, json).await
        }

        Commands::File {
            size,
            ed2k,
            fid,
            fmask,
            amask,
        } => {
            let fmask = match fmask {
                Some(fields) => FILE_FMASK.mask_for(&fields)?,
                None => FILE_FMASK.mask_for(DEFAULT_FILE_FIELDS)?,
            };
            let amask = match amask {
                Some(fields) => FILE_AMASK.mask_for(&fields)?,
                None => FILE_AMASK.mask_for(DEFAULT_FILE_ANIME_FIELDS)?,
            };
            let result = match (size, ed2k, fid) {
                (Some(size), Some(ed2k), _) => {
                    client.engine_mut().request_file(size, &ed2k, &fmask, &amask)?
                }
                (_, _, Some(fid)) => client
                    .engine_mut()
                    .request_file_by_id(fid, &fmask, &amask)?,
                _ => return Err("give --size and --ed2k, or --fid".into()),
            };
            lookup(client, catalog, result, timeout, json).await
        }

        Commands::Episode { eid } => {
            let result = client.engine_mut().request_episode(eid)?;
            lookup(client, catalog, result, timeout, json).await
        }

        Commands::Group { gid } => {
            let result = client.engine_mut().request_group(gid)?;
            lookup(client, catalog, result, timeout, json).await
        }

        Commands::Mylist { lid } => {
            let result = client.engine_mut().mylist(lid)?;
            lookup(client, catalog, result, timeout, json).await
        }

        Commands::MylistAdd {
            size,
            ed2k,
            viewed,
            state,
            storage,
        } => {
            let mut add = MylistAdd::new(size, ed2k);
            if viewed {
                add = add.with_viewed(true);
            }
            if let Some(state) = state {
                add = add.with_state(state);
            }
            if let Some(storage) = storage {
                add = add.with_storage(storage);
            }

            let tag = queued(client.engine_mut().mylist_add(&add)?)?;
            let outcome = wait(client, tag, timeout).await?;
            if outcome.not_found {
                return Ok(format!("{}", "File not found".yellow()));
            }
            match outcome.added {
                Some((lid, edited)) => {
                    let action = if edited { "Updated" } else { "Added" };
                    match lid {
                        Some(lid) => Ok(format!("{} mylist entry {}", action.green(), lid)),
                        None => Ok(format!("{} mylist entry", action.green())),
                    }
                }
                None => match outcome.last_code() {
                    Some(code) => Err(format!("server answered {}", code).into()),
                    None => Err("no reply".into()),
                },
            }
        }

        Commands::Export { template } => {
            let tag = queued(client.engine_mut().mylist_export(&template)?)?;
            let mut failure = None;
            let event = client
                .run_until(timeout, |event| match event {
                    EngineEvent::Replied { tag: t, code }
                        if *t == tag && *code != ReplyCode::ExportQueued =>
                    {
                        failure = Some(format!("server answered {}", code));
                        true
                    }
                    EngineEvent::TimedOut { tag: t, .. } if *t == tag => {
                        failure = Some("export request timed out".to_string());
                        true
                    }
                    EngineEvent::LoginFailed => {
                        failure = Some("login rejected".to_string());
                        true
                    }
                    EngineEvent::ExportReady { .. } | EngineEvent::ExportPollExpired => true,
                    _ => false,
                })
                .await?;
            if let Some(failure) = failure {
                return Err(failure.into());
            }
            match event {
                EngineEvent::ExportReady { nid } => Ok(format!(
                    "{} (notification {})",
                    "Export ready".green(),
                    nid
                )),
                _ => Err("export did not arrive in time".into()),
            }
        }
    }
}

/// Queues a logout and waits briefly for it. Errors are only logged.
pub async fn logout(client: &mut Client) {
    if !client.engine().session().is_logged_in() {
        return;
    }
    match client.engine_mut().logout() {
        Ok(EnqueueResult::Queued(_)) => {
            let result = client
                .run_until(Duration::from_secs(10), |e| {
                    matches!(e, EngineEvent::LoggedOut)
                })
                .await;
            if let Err(e) = result {
                tracing::warn!("Logout failed: {}", e);
            }
        }
        Ok(_) => {}
        Err(e) => tracing::warn!("Logout failed: {}", e),
    }
}

fn queued(result: EnqueueResult) -> Result<u64, Box<dyn Error>> {
    match result {
        EnqueueResult::Queued(tag) => Ok(tag),
        EnqueueResult::Duplicate => Err("request already in flight".into()),
        EnqueueResult::AlreadyKnown => Err("nothing to request".into()),
        EnqueueResult::Banned => Err("client is banned".into()),
    }
}

/// What came back for a request and its follow-ups.
#[derive(Debug, Default)]
struct Outcome {
    records: Vec<(RecordKind, u64)>,
    codes: Vec<ReplyCode>,
    not_found: bool,
    added: Option<(Option<u64>, bool)>,
}

impl Outcome {
    fn last_code(&self) -> Option<ReplyCode> {
        self.codes.last().copied()
    }
}

/// Ticks until the request with `tag` and every follow-up it spawned got a
/// final answer.
async fn wait(client: &mut Client, tag: u64, timeout: Duration) -> Result<Outcome, Box<dyn Error>> {
    let mut pending = BTreeSet::from([tag]);
    let mut outcome = Outcome::default();
    let mut failure = None;

    client
        .run_until(timeout, |event| {
            match event {
                EngineEvent::FollowUpQueued { tag, followup } if pending.contains(tag) => {
                    pending.insert(*followup);
                }
                EngineEvent::Record { tag, record, .. } if pending.contains(tag) => {
                    let subject = (record.kind(), record.id());
                    if !outcome.records.contains(&subject) {
                        outcome.records.push(subject);
                    }
                }
                EngineEvent::NotFound { tag, .. } if pending.contains(tag) => {
                    outcome.not_found = true;
                }
                EngineEvent::MylistAdded { tag, lid, edited } if pending.contains(tag) => {
                    outcome.added = Some((*lid, *edited));
                }
                EngineEvent::Replied { tag, code } => {
                    if pending.remove(tag) {
                        outcome.codes.push(*code);
                    }
                }
                EngineEvent::TimedOut { tag, .. } => {
                    if pending.remove(tag) {
                        failure = Some("request timed out, outcome unknown".to_string());
                    }
                }
                EngineEvent::LoginFailed => {
                    failure = Some("login rejected".to_string());
                    return true;
                }
                _ => {}
            }
            pending.is_empty()
        })
        .await?;

    match failure {
        Some(failure) => Err(failure.into()),
        None => Ok(outcome),
    }
}

async fn lookup(
    client: &mut Client,
    catalog: &MemoryCatalog,
    result: EnqueueResult,
    timeout: Duration,
    json: bool,
) -> CmdResult {
    let tag = queued(result)?;
    let outcome = wait(client, tag, timeout).await?;

    if outcome.not_found {
        return Ok(format!("{}", "Not found".yellow()));
    }
    if outcome.records.is_empty() {
        return match outcome.last_code() {
            Some(code) => Err(format!("server answered {}", code).into()),
            None => Err("no reply".into()),
        };
    }

    let mut output = Vec::new();
    for (kind, id) in outcome.records {
        // Follow-ups merge into the stored record
        if let Some(record) = catalog.get(kind, id) {
            output.push(render_record(&record, json)?);
        }
    }
    Ok(output.join("\n\n"))
}

fn render_record(record: &CatalogRecord, json: bool) -> CmdResult {
    if json {
        return Ok(serde_json::to_string_pretty(record)?);
    }

    let mut lines = Vec::new();
    flatten("", &serde_json::to_value(record)?, &mut lines);

    let mut output = format!("{}\n", record.subject().to_string().bold());
    for (key, value) in lines {
        if key == "kind" {
            continue;
        }
        output.push_str(&format!("  {}: {}\n", key.cyan(), value));
    }
    Ok(output.trim_end().to_string())
}

fn flatten(prefix: &str, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => {
            for (key, value) in map {
                let key = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten(&key, value, out);
            }
        }
        Value::Array(items) => {
            if !items.is_empty() {
                let joined: Vec<String> = items.iter().map(scalar).collect();
                out.push((prefix.to_string(), joined.join(", ")));
            }
        }
        Value::Null => {}
        other => out.push((prefix.to_string(), scalar(other))),
    }
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anisync_core::{AnimeInfo, EpisodeInfo};
    use anisync_protocol::FieldBag;

    #[test]
    fn test_encode_and_decode_mask() {
        colored::control::set_override(false);
        let encoded = mask(&MaskCommand::Encode {
            layout: Layout::Anime,
            fields: vec!["year".into(), "episodes".into()],
        })
        .unwrap();
        assert_eq!(encoded, "20008000000000 (2 fields)");

        let decoded = mask(&MaskCommand::Decode {
            layout: Layout::Anime,
            mask: "20008000000000".into(),
        })
        .unwrap();
        assert!(decoded.contains("year"));
        assert!(decoded.contains("episodes"));
        assert!(!decoded.contains("rating"));
    }

    #[test]
    fn test_unknown_field_is_an_error() {
        let result = mask(&MaskCommand::Encode {
            layout: Layout::Fmask,
            fields: vec!["nope".into()],
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_bad_mask_is_an_error() {
        assert!(parse_mask(Layout::Anime, "xyz").is_err());
        assert!(parse_mask(Layout::Anime, "0").unwrap().is_empty());
    }

    #[test]
    fn test_apply_reports_followup_mask() {
        colored::control::set_override(false);
        let output = mask(&MaskCommand::Apply {
            layout: Layout::Anime,
            mask: "20008000000000".into(),
            line: "1998".into(),
            truncated: true,
        })
        .unwrap();
        assert!(output.contains("year: 1998"));
        assert!(output.contains("episodes: -"));
        assert!(output.contains("Follow-up mask: 00008000000000"));
    }

    #[test]
    fn test_render_record_flattens_fields() {
        let mut fields = FieldBag::new();
        fields.insert("year".into(), "1998".into());
        let record = CatalogRecord::Anime(AnimeInfo::new(1, fields));

        colored::control::set_override(false);
        let output = render_record(&record, false).unwrap();
        assert!(output.starts_with("anime:1"));
        assert!(output.contains("year: 1998"));
        assert!(!output.contains("kind:"));
    }

    #[test]
    fn test_render_record_json() {
        let record = CatalogRecord::Episode(EpisodeInfo {
            eid: 5,
            ..Default::default()
        });
        let output = render_record(&record, true).unwrap();
        let value: Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["kind"], "episode");
    }

    #[test]
    fn test_queued_maps_outcomes() {
        assert_eq!(queued(EnqueueResult::Queued(4)).unwrap(), 4);
        assert!(queued(EnqueueResult::Duplicate).is_err());
        assert!(queued(EnqueueResult::Banned).is_err());
    }
}
