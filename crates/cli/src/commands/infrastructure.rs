//! Infrastructure lifecycle commands

use anyhow::{Context, Result};
use chrono::Utc;
use colored::Colorize;
use obi_core::{
    inventory, InfrastructureBuilder, InfrastructureDescriptor, Platform, ResourceGraph, Settings,
    TeardownEngine,
};
use std::path::Path;
use tabled::Tabled;

use crate::output::{
    format_address, format_age, print_info, print_json, print_success, print_table, print_warning,
    OutputFormat,
};

/// Row for the infrastructures table
#[derive(Tabled)]
struct InfrastructureRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Created")]
    created: String,
    #[tabled(rename = "Age")]
    age: String,
}

/// Row for the objects of one infrastructure
#[derive(Tabled)]
struct ObjectRow {
    #[tabled(rename = "Owner")]
    owner: String,
    #[tabled(rename = "Role")]
    role: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Name")]
    name: String,
}

fn object_rows(owner: &str, graph: &ResourceGraph) -> Vec<ObjectRow> {
    graph
        .iter()
        .map(|(role, name)| ObjectRow {
            owner: owner.to_string(),
            role: role.annotation_key().trim_end_matches("-name").to_string(),
            kind: role.kind().to_string(),
            name: name.to_string(),
        })
        .collect()
}

/// Create an infrastructure from a descriptor file
pub async fn create<P: Platform + ?Sized>(
    platform: &P,
    settings: &Settings,
    file: &Path,
    namespace: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let mut descriptor = InfrastructureDescriptor::from_file(file)
        .with_context(|| format!("Failed to read descriptor {}", file.display()))?;
    if let Some(namespace) = namespace {
        descriptor.namespace = Some(namespace.to_string());
    }

    let created = InfrastructureBuilder::new(platform, settings)
        .create(&descriptor)
        .await?;

    match format {
        OutputFormat::Json => print_json(&created)?,
        OutputFormat::Table => {
            print_success(&format!(
                "Infrastructure {} created in namespace {}",
                created.name.cyan(),
                created.namespace.cyan()
            ));
            println!("Heartbeat:  {}", format_address(Some(&created.heartbeat)));
            println!("API:        {}", format_address(Some(&created.api)));
        }
    }
    Ok(())
}

/// Delete an infrastructure and everything it references
pub async fn delete<P: Platform + ?Sized>(
    platform: &P,
    namespace: &str,
    name: &str,
    format: OutputFormat,
) -> Result<()> {
    let report = TeardownEngine::new(platform).delete(namespace, name).await?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            if !report.found() {
                print_warning(&format!(
                    "Infrastructure {} not found in namespace {}, nothing to delete",
                    name, namespace
                ));
                return Ok(());
            }
            print_success(&format!(
                "Infrastructure {} deleted ({} objects)",
                name.cyan(),
                report.deleted.len()
            ));
            if !report.missing.is_empty() {
                print_info(&format!(
                    "{} referenced objects were already gone",
                    report.missing.len()
                ));
            }
        }
    }
    Ok(())
}

/// Show the reconstructed graph and current addresses
pub async fn describe<P: Platform + ?Sized>(
    platform: &P,
    namespace: &str,
    name: &str,
    format: OutputFormat,
) -> Result<()> {
    let description = inventory::describe(platform, namespace, name).await?;

    match format {
        OutputFormat::Json => print_json(&description)?,
        OutputFormat::Table => {
            println!("{}", "Infrastructure".bold());
            println!("{}", "=".repeat(50));
            println!("Name:       {}", description.summary.name.cyan());
            println!("Namespace:  {}", description.summary.namespace);
            if let Some(created) = description.summary.created_at {
                println!(
                    "Created:    {} ({} ago)",
                    created.to_rfc3339(),
                    format_age(created, Utc::now())
                );
            }
            println!("Master:     {}", format_address(description.master.as_ref()));
            println!("Heartbeat:  {}", format_address(description.heartbeat.as_ref()));
            println!("API:        {}", format_address(description.api.as_ref()));
            println!();

            let mut rows = object_rows(name, &description.graph);
            let predictor_workload = description.graph.get(obi_core::Role::PredictorWorkload);
            match (&description.predictor, predictor_workload) {
                (Some(predictor), Some(owner)) => rows.extend(object_rows(owner, predictor)),
                (None, Some(owner)) => {
                    print_warning(&format!("Predictor workload {} no longer exists", owner))
                }
                _ => {}
            }
            print_table(&rows, "No objects recorded");
        }
    }
    Ok(())
}

/// List infrastructures in a namespace
pub async fn list<P: Platform + ?Sized>(
    platform: &P,
    namespace: &str,
    format: OutputFormat,
) -> Result<()> {
    let summaries = inventory::list(platform, namespace).await?;

    match format {
        OutputFormat::Json => print_json(&summaries)?,
        OutputFormat::Table => {
            let now = Utc::now();
            let rows: Vec<InfrastructureRow> = summaries
                .into_iter()
                .map(|s| InfrastructureRow {
                    created: s
                        .created_at
                        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    age: s
                        .created_at
                        .map(|t| format_age(t, now))
                        .unwrap_or_else(|| "-".to_string()),
                    name: s.name,
                    namespace: s.namespace,
                })
                .collect();
            print_table(&rows, &format!("No infrastructures found in namespace {}", namespace));
        }
    }
    Ok(())
}
