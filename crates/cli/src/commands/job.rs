//! Job submission and status commands

use anyhow::Result;
use colored::Colorize;
use obi_core::submit::{wait_for_job, GcsStore, GrpcDispatcher, JobApiClient, JobStatusSource};
use obi_core::{EventLogger, JobInfo, JobRequest, JobSubmitter, Platform, Settings};
use tabled::Tabled;
use tracing::info;

use crate::output::{print_info, print_json, print_success, print_table, OutputFormat};

/// Submission flags as given on the command line
pub struct SubmitArgs {
    pub executable: String,
    pub job_type: String,
    pub infrastructure: String,
    pub priority: i32,
    pub args: Vec<String>,
    pub wait: bool,
}

/// Row for the jobs table
#[derive(Tabled)]
struct JobRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Infrastructure")]
    infrastructure: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Type")]
    job_type: String,
    #[tabled(rename = "Created")]
    created: String,
}

fn or_dash(value: Option<&str>) -> String {
    value.unwrap_or("-").to_string()
}

fn colored_status(status: &str) -> String {
    match status.to_ascii_lowercase().as_str() {
        "completed" => status.green().to_string(),
        "failed" => status.red().to_string(),
        _ => status.yellow().to_string(),
    }
}

fn job_row(job: &JobInfo) -> JobRow {
    JobRow {
        id: job.id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string()),
        infrastructure: or_dash(job.cluster_name.as_deref()),
        status: colored_status(&job.status),
        job_type: or_dash(job.job_type.as_deref()),
        created: or_dash(job.creation_timestamp.as_deref()),
    }
}

pub async fn submit<P: Platform + ?Sized>(
    platform: &P,
    settings: &Settings,
    args: SubmitArgs,
    format: OutputFormat,
) -> Result<()> {
    let store = GcsStore::from_settings(settings)?;
    let dispatcher = GrpcDispatcher::from_settings(settings);

    // The captured vector starts with the program token, like argv
    let mut argv = vec![args.executable.clone()];
    argv.extend(args.args);

    let request = JobRequest {
        infrastructure: args.infrastructure,
        executable: args.executable,
        job_type: args.job_type,
        priority: args.priority,
        argv,
    };

    let receipt = JobSubmitter::new(platform, settings, &store, &dispatcher)
        .submit(&settings.namespace, &request)
        .await?;

    if let OutputFormat::Table = format {
        print_success(&format!(
            "Submitted {} job {} to {}",
            receipt.job_type,
            receipt.job_id.to_string().cyan(),
            receipt.infrastructure.cyan()
        ));
        println!("Executable: {}", receipt.executable);
        println!("Master:     {}", receipt.master);
    }

    if !args.wait {
        if let OutputFormat::Json = format {
            print_json(&receipt)?;
        }
        return Ok(());
    }

    if let OutputFormat::Table = format {
        print_info("Waiting for job completion...");
    }
    let namespace = &settings.namespace;
    let client =
        JobApiClient::connect(platform, settings, namespace, &receipt.infrastructure).await?;
    let events = EventLogger::new(namespace.as_str());
    let job = wait_for_job(&client, receipt.job_id, settings.job_poll_config(), &events).await?;

    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "submission": receipt,
            "job": job,
        }))?,
        OutputFormat::Table => print_success(&format!(
            "Job {} {}",
            receipt.job_id.to_string().cyan(),
            colored_status(&job.status)
        )),
    }
    Ok(())
}

/// List jobs of an infrastructure
pub async fn list<P: Platform + ?Sized>(
    platform: &P,
    settings: &Settings,
    infrastructure: &str,
    status: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let client =
        JobApiClient::connect(platform, settings, &settings.namespace, infrastructure).await?;
    let jobs = client.jobs(Some(infrastructure), status).await?;
    info!(infrastructure = %infrastructure, count = jobs.len(), "Listed jobs");

    match format {
        OutputFormat::Json => print_json(&jobs)?,
        OutputFormat::Table => {
            let rows: Vec<JobRow> = jobs.iter().map(job_row).collect();
            print_table(&rows, &format!("No jobs found in {}", infrastructure));
        }
    }
    Ok(())
}

/// Show one job's row
pub async fn describe<P: Platform + ?Sized>(
    platform: &P,
    settings: &Settings,
    infrastructure: &str,
    job_id: i32,
    format: OutputFormat,
) -> Result<()> {
    let client =
        JobApiClient::connect(platform, settings, &settings.namespace, infrastructure).await?;
    let job = client.job(job_id).await?;

    match format {
        OutputFormat::Json => print_json(&job)?,
        OutputFormat::Table => {
            println!("{}", format!("Job {}", job_id).bold());
            println!("Infrastructure: {}", or_dash(job.cluster_name.as_deref()));
            println!("Status:         {}", colored_status(&job.status));
            println!("Type:           {}", or_dash(job.job_type.as_deref()));
            println!(
                "Priority:       {}",
                job.priority.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string())
            );
            println!("Created:        {}", or_dash(job.creation_timestamp.as_deref()));
            println!("Executable:     {}", or_dash(job.executable_path.as_deref()));
            println!("Arguments:      {}", or_dash(job.arguments.as_deref()));
            println!("Driver output:  {}", or_dash(job.driver_output_uri.as_deref()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_row_fills_missing_columns() {
        colored::control::set_override(false);
        let job: JobInfo =
            serde_json::from_str(r#"{"id": 4, "clustername": "infra1", "status": "failed"}"#)
                .unwrap();
        let row = job_row(&job);
        assert_eq!(row.id, "4");
        assert_eq!(row.infrastructure, "infra1");
        assert_eq!(row.status, "failed");
        assert_eq!(row.job_type, "-");
        assert_eq!(row.created, "-");
    }
}
