mod jobs;
mod serve;

use anyhow::Result;
use console::style;
use serde_json::Value;

use crate::core::job::JobInputs;
use crate::core::terminal::{GuideSection, print_error};

fn print_help() {
    GuideSection::new("Daemon")
        .command("serve", "Start the crewd API server")
        .print();

    GuideSection::new("Jobs")
        .command("kickoff", "Start a pipeline job")
        .command("status", "Show one job record")
        .command("jobs", "List jobs, newest first")
        .command("feedback", "Approve or revise a paused job")
        .command("delete", "Remove a job record")
        .command("health", "Check the daemon")
        .print();

    GuideSection::new("Common flags")
        .text("--url <base>             API base URL (default http://127.0.0.1:8888)")
        .text("--pipeline, -p <name>    Pipeline to run")
        .text("--input, -i <key=value>  Pipeline input, repeatable")
        .text("--job-id <id>            Job to inspect or act on")
        .print();

    println!(
        "\n {} {} <command> [flags]\n",
        style("Usage:").bold(),
        style("crewd").green()
    );
}

/// Parse repeated `key=value` flags into pipeline inputs. Values that parse
/// as JSON keep their type; everything else stays a string.
pub(crate) fn parse_kv_inputs(pairs: &[String]) -> JobInputs {
    let mut inputs = JobInputs::new();
    for pair in pairs {
        if let Some((key, value)) = pair.split_once('=') {
            let value = serde_json::from_str::<Value>(value)
                .unwrap_or_else(|_| Value::String(value.to_string()));
            inputs.insert(key.trim().to_string(), value);
        }
    }
    inputs
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    match args[1].as_str() {
        "serve" => serve::run_serve(&args).await,
        "kickoff" => jobs::run_kickoff(&args).await,
        "status" => jobs::run_status(&args).await,
        "jobs" => jobs::run_list(&args).await,
        "feedback" => jobs::run_feedback(&args).await,
        "delete" => jobs::run_delete(&args).await,
        "health" => jobs::run_health(&args).await,
        "version" | "--version" | "-V" => {
            println!("crewd {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        cmd => {
            print_error(&format!("Unknown command: {}", cmd));
            print_help();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::parse_kv_inputs;
    use serde_json::json;

    #[test]
    fn parse_kv_inputs_keeps_json_types() {
        let inputs = parse_kv_inputs(&[
            "topic=rust async".to_string(),
            "count=3".to_string(),
            "flag=true".to_string(),
        ]);
        assert_eq!(inputs["topic"], json!("rust async"));
        assert_eq!(inputs["count"], json!(3));
        assert_eq!(inputs["flag"], json!(true));
    }

    #[test]
    fn parse_kv_inputs_ignores_malformed_pairs() {
        let inputs = parse_kv_inputs(&["no-equals-sign".to_string(), "ok=1".to_string()]);
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs["ok"], json!(1));
    }

    #[test]
    fn parse_kv_inputs_splits_on_the_first_equals() {
        let inputs = parse_kv_inputs(&["expr=a=b".to_string()]);
        assert_eq!(inputs["expr"], json!("a=b"));
    }
}
