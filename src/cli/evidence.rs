//! Evidence CLI subcommands.
//!
//! Provides commands to:
//! - `add` / `add-document`: create evidence and queue its verification
//! - `show` / `list`: inspect stored evidence
//! - `verify`: queue another verification
//! - `delete`: remove evidence

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;

use crate::store::EvidenceStore;

use super::{connect, print_evidence};

/// Evidence-related subcommands
#[derive(Subcommand, Debug)]
pub enum EvidenceCommands {
    /// Submit free-text evidence for a claim
    Add {
        /// Claim the evidence supports
        #[arg(short, long)]
        claim: i64,

        /// Where the evidence comes from
        #[arg(short, long)]
        source: String,

        /// Quoted passage
        #[arg(short, long)]
        excerpt: String,
    },

    /// Submit text extracted from a document
    AddDocument {
        /// Claim the evidence supports
        #[arg(short, long)]
        claim: i64,

        /// Original document name, used as the source
        #[arg(short, long)]
        file_name: String,

        /// File holding the extracted text
        #[arg(short, long)]
        text_file: PathBuf,
    },

    /// Show one evidence record
    Show {
        /// Evidence ID
        id: i64,
    },

    /// Queue another verification
    Verify {
        /// Evidence ID
        id: i64,
    },

    /// Delete an evidence record
    Delete {
        /// Evidence ID
        id: i64,
    },

    /// List evidence, newest first
    List {
        /// Only evidence for this claim
        #[arg(short, long)]
        claim: Option<i64>,
    },
}

/// Execute an evidence subcommand
pub async fn execute(command: EvidenceCommands) -> Result<()> {
    let services = connect().await?;
    let producer = services.producer();

    match command {
        EvidenceCommands::Add {
            claim,
            source,
            excerpt,
        } => {
            let submission = producer.submit_text(claim, &source, &excerpt).await?;
            println!(
                "Created evidence {} ({}), queued job {}",
                submission.evidence.id, submission.evidence.status, submission.job_id
            );
        }
        EvidenceCommands::AddDocument {
            claim,
            file_name,
            text_file,
        } => {
            let text = tokio::fs::read_to_string(&text_file)
                .await
                .with_context(|| format!("Failed to read text file: {}", text_file.display()))?;
            let file_path = text_file.to_string_lossy();

            let submission = producer
                .submit_document(claim, &file_name, &text, &file_path)
                .await?;
            println!(
                "Created evidence {} from {} ({} chars), queued job {}",
                submission.evidence.id,
                file_name,
                submission.evidence.excerpt.chars().count(),
                submission.job_id
            );
        }
        EvidenceCommands::Show { id } => match services.store.get_by_id(id).await? {
            Some(evidence) => print_evidence(&evidence),
            None => anyhow::bail!("Evidence not found: {}", id),
        },
        EvidenceCommands::Verify { id } => {
            let job_id = producer.request_reverify(id).await?;
            println!("Queued verification of evidence {} (job {})", id, job_id);
        }
        EvidenceCommands::Delete { id } => {
            producer.delete(id).await?;
            println!("Deleted evidence {}", id);
        }
        EvidenceCommands::List { claim } => {
            let evidence = services.store.list(claim).await?;
            if evidence.is_empty() {
                println!("No evidence found.");
            } else {
                println!(
                    "{:<6} {:<6} {:<10} {:<6} {}",
                    "ID", "CLAIM", "STATUS", "SCORE", "SOURCE"
                );
                println!("{}", "-".repeat(70));
                for ev in evidence {
                    let score = ev.score.map(|s| s.to_string()).unwrap_or_else(|| "-".into());
                    println!(
                        "{:<6} {:<6} {:<10} {:<6} {}",
                        ev.id, ev.claim_id, ev.status, score, ev.source
                    );
                }
            }
        }
    }

    drop(producer);
    services.close().await
}
