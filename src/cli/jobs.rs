//! Client-side job commands. These talk to a running daemon over HTTP and
//! drive the interactive approval loop from the terminal.

use std::io::Write;

use anyhow::Result;
use console::style;
use serde_json::Value;

use super::parse_kv_inputs;
use crate::client::{JobClient, KickoffOptions, PollOptions, PollOutcome, ReviewDecision};
use crate::core::terminal::{print_error, print_info, print_status, print_success, print_warn};

const DEFAULT_URL: &str = "http://127.0.0.1:8888";

fn base_url(args: &[String]) -> String {
    let mut i = 2;
    while i < args.len() {
        if args[i] == "--url" && i + 1 < args.len() {
            return args[i + 1].clone();
        }
        i += 1;
    }
    std::env::var("CREWD_URL").unwrap_or_else(|_| DEFAULT_URL.to_string())
}

fn flag_value(args: &[String], names: &[&str]) -> Option<String> {
    let mut i = 2;
    while i < args.len() {
        if names.contains(&args[i].as_str()) && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
        i += 1;
    }
    None
}

fn has_flag(args: &[String], name: &str) -> bool {
    args.iter().skip(2).any(|a| a == name)
}

#[derive(Debug, Default, PartialEq)]
pub(crate) struct KickoffArgs {
    pub pipeline: Option<String>,
    pub inputs: Vec<String>,
    pub approval: bool,
    pub wait: bool,
    pub webhook: Option<String>,
    pub no_poll: bool,
}

pub(crate) fn parse_kickoff_args(args: &[String], start: usize) -> KickoffArgs {
    let mut parsed = KickoffArgs::default();
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--pipeline" | "-p" => {
                if i + 1 < args.len() {
                    parsed.pipeline = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--input" | "-i" => {
                if i + 1 < args.len() {
                    parsed.inputs.push(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--webhook" => {
                if i + 1 < args.len() {
                    parsed.webhook = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--approval" => {
                parsed.approval = true;
                i += 1;
            }
            "--wait" => {
                parsed.wait = true;
                i += 1;
            }
            "--no-poll" => {
                parsed.no_poll = true;
                i += 1;
            }
            _ => i += 1,
        }
    }
    parsed
}

fn print_pretty(value: &Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    );
}

fn print_outcome(outcome: PollOutcome) {
    match outcome {
        PollOutcome::Completed(job) => {
            print_success("Job completed");
            if let Some(result) = job.get("result") {
                print_pretty(result);
            }
        }
        PollOutcome::Failed { error } => print_error(&format!("Job failed: {}", error)),
        PollOutcome::PendingApproval(_) => {
            print_warn("Job is paused awaiting approval. Resume with 'crewd feedback'.")
        }
        PollOutcome::StillProcessing => {
            print_warn("Polling budget exhausted. The job may still be processing; check 'crewd status' later.")
        }
    }
}

/// Show the draft and read the reviewer's decision from the terminal.
fn prompt_review(job: &Value) -> ReviewDecision {
    println!();
    print_info("The pipeline produced a draft that needs your approval:");
    if let Some(content) = job
        .get("result")
        .and_then(|r| r.get("content"))
        .and_then(Value::as_str)
    {
        println!("\n{}\n", content);
    } else if let Some(result) = job.get("result") {
        print_pretty(result);
    }

    loop {
        print!(
            "{} ",
            style("[a]pprove, [r]evise, [q]uit:").bold().cyan()
        );
        let _ = std::io::stdout().flush();
        let mut line = String::new();
        if std::io::stdin().read_line(&mut line).is_err() {
            return ReviewDecision::Abort;
        }
        match line.trim().to_lowercase().as_str() {
            "a" | "approve" => return ReviewDecision::Approve,
            "r" | "revise" => {
                print!("{} ", style("Feedback:").bold());
                let _ = std::io::stdout().flush();
                let mut feedback = String::new();
                if std::io::stdin().read_line(&mut feedback).is_ok()
                    && !feedback.trim().is_empty()
                {
                    return ReviewDecision::Revise(feedback.trim().to_string());
                }
                print_warn("Feedback cannot be empty.");
            }
            "q" | "quit" => return ReviewDecision::Abort,
            _ => print_warn("Please answer a, r, or q."),
        }
    }
}

pub(crate) async fn run_kickoff(args: &[String]) -> Result<()> {
    let parsed = parse_kickoff_args(args, 2);
    let Some(pipeline) = parsed.pipeline else {
        print_error("Error: --pipeline is required.");
        return Ok(());
    };

    let client = JobClient::new(&base_url(args));
    let options = KickoffOptions {
        inputs: parse_kv_inputs(&parsed.inputs),
        require_approval: parsed.approval,
        webhook_url: parsed.webhook.clone(),
        wait: parsed.wait,
    };
    let response = client.kickoff(&pipeline, &options).await?;

    if parsed.wait {
        print_pretty(&response);
        return Ok(());
    }

    let job_id = response["job_id"].as_str().unwrap_or_default().to_string();
    print_status("Job", &job_id);

    if parsed.webhook.is_some() {
        print_info("A webhook receiver is registered; not polling for the result.");
        return Ok(());
    }
    if parsed.no_poll {
        return Ok(());
    }

    let poll = PollOptions::default();
    let outcome = if parsed.approval {
        client.run_hitl(&job_id, &poll, prompt_review).await?
    } else {
        client.poll_until_settled(&job_id, &poll).await?
    };
    print_outcome(outcome);
    Ok(())
}

pub(crate) async fn run_status(args: &[String]) -> Result<()> {
    let Some(job_id) = flag_value(args, &["--job-id", "-j"]) else {
        print_error("Error: --job-id is required.");
        return Ok(());
    };
    let client = JobClient::new(&base_url(args));
    match client.job(&job_id).await? {
        Some(job) => print_pretty(&job),
        None => print_error("Job not found"),
    }
    Ok(())
}

pub(crate) async fn run_list(args: &[String]) -> Result<()> {
    let client = JobClient::new(&base_url(args));
    let status = flag_value(args, &["--status"]);
    let limit = flag_value(args, &["--limit"]).and_then(|v| v.parse().ok());
    let listing = client.jobs(status.as_deref(), limit).await?;

    let jobs = listing["jobs"].as_array().cloned().unwrap_or_default();
    for job in &jobs {
        println!(
            "{}  {:16}  {:16}  {}",
            job["id"].as_str().unwrap_or("?"),
            job["status"].as_str().unwrap_or("?"),
            job["pipeline"].as_str().unwrap_or("?"),
            job["created_at"].as_str().unwrap_or("?"),
        );
    }
    print_info(&format!(
        "{} of {} jobs shown",
        jobs.len(),
        listing["total_jobs"].as_u64().unwrap_or(0)
    ));
    Ok(())
}

pub(crate) async fn run_feedback(args: &[String]) -> Result<()> {
    let Some(job_id) = flag_value(args, &["--job-id", "-j"]) else {
        print_error("Error: --job-id is required.");
        return Ok(());
    };
    let approved = has_flag(args, "--approve");
    let message = flag_value(args, &["--message", "-m"]);
    if !approved && message.is_none() {
        print_error("Error: provide --approve or --message <feedback>.");
        return Ok(());
    }

    let client = JobClient::new(&base_url(args));
    let response = client
        .submit_feedback(&job_id, message.as_deref(), approved)
        .await?;
    if approved {
        print_success(&format!("Job {} approved.", job_id));
    } else {
        print_success(&format!("Job {} sent back for revision.", job_id));
    }
    print_status("Status", response["status"].as_str().unwrap_or("?"));
    Ok(())
}

pub(crate) async fn run_delete(args: &[String]) -> Result<()> {
    let Some(job_id) = flag_value(args, &["--job-id", "-j"]) else {
        print_error("Error: --job-id is required.");
        return Ok(());
    };
    let client = JobClient::new(&base_url(args));
    if client.delete_job(&job_id).await? {
        print_success(&format!("Job {} deleted.", job_id));
    } else {
        print_error("Job not found");
    }
    Ok(())
}

pub(crate) async fn run_health(args: &[String]) -> Result<()> {
    let client = JobClient::new(&base_url(args));
    print_pretty(&client.health().await?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(rest: &[&str]) -> Vec<String> {
        let mut args = vec!["crewd".to_string(), "kickoff".to_string()];
        args.extend(rest.iter().map(|s| s.to_string()));
        args
    }

    #[test]
    fn kickoff_args_collect_repeated_inputs() {
        let args = argv(&[
            "--pipeline",
            "ContentCreationCrew",
            "-i",
            "topic=rust",
            "-i",
            "tone=formal",
            "--approval",
        ]);
        let parsed = parse_kickoff_args(&args, 2);
        assert_eq!(parsed.pipeline.as_deref(), Some("ContentCreationCrew"));
        assert_eq!(parsed.inputs, vec!["topic=rust", "tone=formal"]);
        assert!(parsed.approval);
        assert!(!parsed.wait);
    }

    #[test]
    fn kickoff_args_read_webhook_and_wait() {
        let args = argv(&["-p", "Echo", "--wait", "--webhook", "http://x/hook"]);
        let parsed = parse_kickoff_args(&args, 2);
        assert!(parsed.wait);
        assert_eq!(parsed.webhook.as_deref(), Some("http://x/hook"));
    }

    #[test]
    fn base_url_prefers_the_flag() {
        let args = argv(&["--url", "http://10.0.0.5:9000"]);
        assert_eq!(base_url(&args), "http://10.0.0.5:9000");
    }
}
