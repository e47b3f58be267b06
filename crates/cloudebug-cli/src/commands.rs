//! Subcommand implementations
//!
//! Every command runs against a connected [`DebugClient`] and prints through
//! the [`StdoutEventSink`], so text and JSON output share one path.

use cloudebug_core::events::{EventPump, EventSink, StdoutEventSink, UNEXPECTED_DISCONNECT};
use cloudebug_core::{BreakpointRequest, DebugClient, Toggled};

use crate::Action;

/// Run a one-shot subcommand
pub async fn run(
    client: &DebugClient,
    action: Action,
    sink: &StdoutEventSink,
) -> Result<(), String> {
    // `connect` already asked for the list; wait until it is cached.
    client.refresh().await?;

    match action {
        Action::List => list(client, sink).await,
        Action::Add {
            file,
            line,
            condition,
            expressions,
        } => {
            let breakpoint = client
                .add_breakpoint(request(file, line, condition, expressions))
                .await?;
            if sink.json_output {
                sink.emit_custom("added", &breakpoint).await
            } else {
                println!(
                    "Added breakpoint {} at {}:{} with {}",
                    breakpoint.id,
                    breakpoint.file,
                    breakpoint.line,
                    breakpoint.condition_text()
                );
                Ok(())
            }
        }
        Action::Remove { id } => {
            let removed = client.remove_breakpoint(id).await?;
            if sink.json_output {
                sink.emit_custom("removed", &removed).await
            } else {
                println!("Removed breakpoint {removed}");
                Ok(())
            }
        }
        Action::Toggle {
            file,
            line,
            condition,
            expressions,
        } => match client
            .toggle_breakpoint(request(file, line, condition, expressions))
            .await?
        {
            Toggled::Added(breakpoint) if sink.json_output => {
                sink.emit_custom("added", &breakpoint).await
            }
            Toggled::Added(breakpoint) => {
                println!(
                    "Added breakpoint {} at {}:{}",
                    breakpoint.id, breakpoint.file, breakpoint.line
                );
                Ok(())
            }
            Toggled::Removed(id) if sink.json_output => sink.emit_custom("removed", &id).await,
            Toggled::Removed(id) => {
                println!("Removed breakpoint {id}");
                Ok(())
            }
        },
        Action::Hits { id } => {
            if client.cache().breakpoint(id).is_none() {
                return Err(format!("No breakpoint with ID {id}"));
            }
            let hits = client.hits(id).await?;
            if sink.json_output {
                sink.emit_custom("hits", &hits).await
            } else {
                if let Some(node) = client.tree().find_breakpoint(id) {
                    print!("{}", client.tree().outline_of(&node));
                }
                Ok(())
            }
        }
        Action::Reveal { file, line } => match client.reveal(&file, line).await? {
            Some(node) if sink.json_output => {
                let id = node.breakpoint_id();
                let view = client
                    .tree()
                    .snapshot()
                    .into_iter()
                    .find(|view| view.breakpoint.id == id);
                sink.emit_custom("revealed", &view).await
            }
            Some(node) => {
                print!("{}", client.tree().outline_of(&node));
                Ok(())
            }
            None => Err(format!("No breakpoint at {file}:{line}")),
        },
        Action::Gutter { file } => {
            let markers = client.gutter_markers(&file);
            if sink.json_output {
                sink.emit_custom("gutter", &markers).await
            } else {
                for marker in markers {
                    println!("{}\t{}", marker.line, marker.hover);
                }
                Ok(())
            }
        }
        Action::Watch => Err("watch is handled by the event pump".to_string()),
    }
}

/// Stream notifications until interrupted or the server goes away
pub async fn watch(
    client: &DebugClient,
    pump: EventPump,
    sink: &StdoutEventSink,
) -> Result<(), String> {
    tokio::select! {
        expected = pump.run(sink) => {
            if expected {
                Ok(())
            } else {
                Err(UNEXPECTED_DISCONNECT.to_string())
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, disconnecting");
            client.disconnect();
            Ok(())
        }
    }
}

async fn list(client: &DebugClient, sink: &StdoutEventSink) -> Result<(), String> {
    if sink.json_output {
        return sink.emit_custom("breakpoints", &client.tree().snapshot()).await;
    }

    let breakpoints = client.cache().breakpoints();
    if breakpoints.is_empty() {
        println!("No breakpoints.");
    }
    for breakpoint in breakpoints {
        println!(
            "{}\t{}:{}\t{}",
            breakpoint.id,
            breakpoint.file,
            breakpoint.line,
            breakpoint.condition_text()
        );
        for expression in &breakpoint.expressions {
            println!("\t\t{expression}");
        }
    }
    Ok(())
}

fn request(
    file: String,
    line: u32,
    condition: Option<String>,
    expressions: Vec<String>,
) -> BreakpointRequest {
    let request = BreakpointRequest::new(file, line).with_expressions(expressions);
    match condition {
        Some(condition) => request.with_condition(condition),
        None => request,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_drops_blank_parts() {
        let built = request(
            "a.py".to_string(),
            3,
            Some(String::new()),
            vec!["x".to_string(), String::new()],
        );
        assert_eq!(built.condition, None);
        assert_eq!(built.expressions, vec!["x"]);
    }
}
