//! Per-container log tailing, driven by WebSocket subscription refcounts.
//!
//! The first subscriber of `container:<moduleID>:<service>` starts a
//! `docker logs --timestamps --follow` child; the last one leaving fires
//! the stored cancellation handle, which kills the process and clears the
//! topic entry.

use std::process::Stdio;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use pan_bagnat_common::topics::parse_container_topic;
use pan_bagnat_common::types::Event;

use super::Fabric;

/// Line buffer for merged stdout/stderr.
const LINE_BUFFER: usize = 1024 * 1024;

/// Wire the registry's refcount hooks to tail start/stop.
pub(crate) fn install_hooks(fabric: Arc<Fabric>) {
    let registry = fabric.registry.clone();
    let on_sub = {
        let fabric = fabric.clone();
        move |topic: &str, count: usize| {
            if count == 1 {
                start_tail(&fabric, topic);
            }
        }
    };
    let on_unsub = {
        let fabric = fabric.clone();
        move |topic: &str, count: usize| {
            if count == 0 {
                stop_tail(&fabric, topic);
            }
        }
    };
    registry.set_hooks(on_sub, on_unsub);
}

fn start_tail(fabric: &Arc<Fabric>, topic: &str) {
    if parse_container_topic(topic).is_none() {
        return;
    }
    let token = CancellationToken::new();
    {
        let mut cancels = fabric.cancels.lock().expect("cancels lock poisoned");
        if cancels.contains_key(topic) {
            return; // tail already running
        }
        cancels.insert(topic.to_string(), token.clone());
    }
    let fabric = fabric.clone();
    let topic = topic.to_string();
    tokio::spawn(async move {
        if let Err(e) = run_tail(&fabric, &topic, token).await {
            warn!(topic = %topic, "log tail ended with error: {e}");
        }
        fabric
            .cancels
            .lock()
            .expect("cancels lock poisoned")
            .remove(&topic);
    });
}

fn stop_tail(fabric: &Arc<Fabric>, topic: &str) {
    let token = fabric
        .cancels
        .lock()
        .expect("cancels lock poisoned")
        .remove(topic);
    if let Some(token) = token {
        debug!(topic = %topic, "stopping log tail");
        token.cancel();
    }
}

async fn run_tail(
    fabric: &Arc<Fabric>,
    topic: &str,
    token: CancellationToken,
) -> anyhow::Result<()> {
    let Some((module_id, service)) = parse_container_topic(topic) else {
        return Ok(());
    };
    let module = fabric.store.get_module(module_id).await?;
    let container = format!("{}-{}-1", module.slug, service);
    debug!(topic = %topic, container = %container, "starting log tail");

    let mut child = Command::new("docker")
        .args(["logs", "--timestamps", "--follow", container.as_str()])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    // stderr is merged into the same topic stream.
    let out = spawn_emitter(fabric.clone(), topic.to_string(), child.stdout.take());
    let err = spawn_emitter(fabric.clone(), topic.to_string(), child.stderr.take());

    tokio::select! {
        _ = token.cancelled() => {
            let _ = child.kill().await;
            let _ = child.wait().await;
        }
        _ = child.wait() => {}
    }
    let _ = out.await;
    let _ = err.await;
    Ok(())
}

fn spawn_emitter<R>(
    fabric: Arc<Fabric>,
    topic: String,
    pipe: Option<R>,
) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(pipe) = pipe else { return };
        let mut lines = BufReader::with_capacity(LINE_BUFFER, pipe).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.is_empty() {
                continue;
            }
            let (ts, message) = split_log_line(&line);
            let mut event = Event::new(
                "container_log",
                Some(topic.clone()),
                serde_json::json!({"timestamp": ts, "message": message}),
            );
            event.timestamp = ts;
            fabric.registry.push(event);
        }
    })
}

/// `docker logs --timestamps` prefixes each line with an RFC3339 stamp;
/// split at the first space, defaulting the timestamp to now.
fn split_log_line(line: &str) -> (DateTime<Utc>, String) {
    if let Some((ts, rest)) = line.split_once(' ')
        && let Ok(parsed) = DateTime::parse_from_rfc3339(ts)
    {
        return (parsed.with_timezone(&Utc), rest.to_string());
    }
    (Utc::now(), line.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_log_line_with_timestamp() {
        let (ts, msg) = split_log_line("2025-03-01T10:00:00.123456789Z listening on :3000");
        assert_eq!(ts.timestamp(), 1740823200);
        assert_eq!(msg, "listening on :3000");
    }

    #[test]
    fn test_split_log_line_without_timestamp() {
        let (_, msg) = split_log_line("plain output line");
        assert_eq!(msg, "plain output line");
    }

    #[test]
    fn test_split_log_line_preserves_inner_spaces() {
        let (_, msg) = split_log_line("2025-03-01T10:00:00Z a b  c");
        assert_eq!(msg, "a b  c");
    }
}
