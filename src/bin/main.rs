use fin_reasoning_orchestrator::{
    bootstrap::build_runtime,
    config::Settings,
    ingestion::load_jsonl,
    models::AnswerRecord,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: agent [ingest <chunks.jsonl> | ask <query>]";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let settings = Settings::from_env()?;
    let runtime = build_runtime(&settings).await?;

    let args: Vec<String> = std::env::args().skip(1).collect();

    match args.first().map(String::as_str) {
        Some("ingest") => {
            let path = args.get(1).ok_or(USAGE)?;
            let chunks = load_jsonl(path).await?;
            info!(chunks = chunks.len(), path = %path, "Loaded chunks");

            let report = runtime.ingestor.ingest(chunks).await?;
            println!(
                "Ingested {} chunk(s) ({} embedded lane vectors, {} placeholders)",
                report.upserted, report.embedded, report.placeholders
            );
            for rejected in &report.rejected {
                println!("  rejected {}: {}", rejected.id, rejected.reason);
            }
            Ok(())
        }
        Some("ask") => {
            let query = args[1..].join(" ");
            let record = runtime.orchestrator.run(&query).await?;
            print_answer(&record);
            Ok(())
        }
        Some(_) => Err(USAGE.into()),
        None => interactive(&runtime.orchestrator).await,
    }
}

async fn interactive(
    orchestrator: &fin_reasoning_orchestrator::agent::Orchestrator,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("Financial reasoning agent. Type 'exit' to quit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"\n> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let query = line.trim();

        if query.is_empty() {
            continue;
        }
        if matches!(query.to_lowercase().as_str(), "exit" | "quit" | "q") {
            break;
        }

        match orchestrator.run(query).await {
            Ok(record) => print_answer(&record),
            Err(e) => eprintln!("Error: {}", e),
        }
    }

    Ok(())
}

fn print_answer(record: &AnswerRecord) {
    println!("\n{}", record.text);

    if !record.citations.is_empty() && !record.text.contains("Sources:") {
        println!("\nSources:");
        for citation in &record.citations {
            println!("  [{}] {} ({})", citation.marker, citation.label, citation.reference);
        }
    }

    if record.is_low_confidence() {
        println!("\nLow confidence:");
        for reason in &record.low_confidence_reasons {
            println!("  - {}", reason);
        }
    } else if !record.caveats.is_empty() {
        println!("\nNotes:");
        for caveat in &record.caveats {
            println!("  - {}", caveat);
        }
    }

    println!(
        "\n({} iteration(s), {} chunk(s), {} web result(s))",
        record.iterations, record.retrieved_count, record.web_count
    );
}
