//! Subcommand implementations.
//!
//! Each command reads JSON Lines input and writes JSON to the given writer,
//! one document per line unless `pretty` is set.

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use hapi_core::{
    EnhancedMode, ModeAwareQueue, TimelineOptions, build_timeline, hash_mode, normalize_messages,
};
use hapi_protocol::{AgentState, ChatBlock, RawMessage};

use crate::config::AppConfig;

/// Read a JSON Lines file, skipping blank lines.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut items = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("reading {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let item = serde_json::from_str(&line)
            .with_context(|| format!("parsing {}:{}", path.display(), index + 1))?;
        items.push(item);
    }
    Ok(items)
}

fn write_json<T: Serialize>(out: &mut impl Write, value: &T, pretty: bool) -> Result<()> {
    let text = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .context("serializing output")?;
    writeln!(out, "{text}").context("writing output")
}

/// Print every normalized message.
pub fn normalize(path: &Path, out: &mut impl Write) -> Result<usize> {
    let raw: Vec<RawMessage> = read_jsonl(path)?;
    let normalized = normalize_messages(&raw);
    debug!(raw = raw.len(), normalized = normalized.len(), "normalized transcript");

    for message in &normalized {
        write_json(out, message, false)?;
    }
    Ok(normalized.len())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReduceOutput {
    pub blocks: Vec<ChatBlock>,
    pub has_ready_event: bool,
}

/// Reduce a transcript into chat blocks.
pub fn reduce(
    path: &Path,
    agent_state: Option<&Path>,
    options: &TimelineOptions,
    out: &mut impl Write,
    pretty: bool,
) -> Result<ReduceOutput> {
    let raw: Vec<RawMessage> = read_jsonl(path)?;
    let agent_state: Option<AgentState> = match agent_state {
        Some(state_path) => {
            let text = fs::read_to_string(state_path)
                .with_context(|| format!("reading {}", state_path.display()))?;
            Some(
                serde_json::from_str(&text)
                    .with_context(|| format!("parsing agent state {}", state_path.display()))?,
            )
        }
        None => None,
    };

    let result = build_timeline(&raw, agent_state.as_ref(), options);
    info!(
        messages = raw.len(),
        blocks = result.blocks.len(),
        tools = result.tool_blocks_by_id.len(),
        "reduced transcript"
    );

    let output = ReduceOutput {
        blocks: result.blocks,
        has_ready_event: result.has_ready_event,
    };
    write_json(out, &output, pretty)?;
    Ok(output)
}

/// One queued instruction in a `batch` input file.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchLine {
    pub message: String,
    #[serde(default)]
    pub mode: Option<EnhancedMode>,
    #[serde(default)]
    pub isolate: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchOutput {
    pub message: String,
    pub mode: EnhancedMode,
    pub hash: String,
    pub isolate: bool,
}

/// Feed instructions through a queue and print the batches it forms.
pub async fn batch(path: &Path, config: &AppConfig, out: &mut impl Write) -> Result<Vec<BatchOutput>> {
    let lines: Vec<BatchLine> = read_jsonl(path)?;
    let queue = ModeAwareQueue::new(hash_mode::<EnhancedMode>).with_on_message(|message, mode| {
        debug!(
            chars = message.len(),
            permission_mode = %mode.permission_mode,
            "queued instruction"
        );
    });

    for line in lines {
        let mode = line
            .mode
            .unwrap_or_else(|| EnhancedMode::new(config.queue.default_mode));
        if line.isolate {
            queue.push_isolate_and_clear(line.message, mode)?;
        } else {
            queue.push(line.message, mode)?;
        }
    }
    queue.close();

    let mut batches = Vec::new();
    while let Some(batch) = queue.wait_for_batch(None).await {
        let output = BatchOutput {
            message: batch.message,
            mode: batch.mode,
            hash: batch.hash,
            isolate: batch.isolate,
        };
        write_json(out, &output, false)?;
        batches.push(output);
    }
    info!(batches = batches.len(), "queue drained");
    Ok(batches)
}
