use math_query_resolver::{agent::Orchestrator, config::ResolverConfig, models::AnswerSource};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let query = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if query.trim().is_empty() {
        eprintln!("usage: resolve <math question>");
        eprintln!("example: resolve integrate x^2 from 0 to 5");
        std::process::exit(2);
    }

    let config = ResolverConfig::from_env()?;
    let orchestrator = Orchestrator::from_config(&config)?;

    info!(engines = ?orchestrator.engine_names(), "Resolver starting");

    match orchestrator.run(&query).await {
        Ok(resolution) => {
            println!("\n=== RESOLUTION ===");
            println!("Answer: {}", resolution.answer.primary);
            if resolution.answer.exact != resolution.answer.primary {
                println!("Exact: {}", resolution.answer.exact);
            }
            match &resolution.source {
                AnswerSource::Engine { engine } => println!("Engine: {}", engine),
                AnswerSource::Fallback => println!("Engine: generative fallback (unvalidated)"),
            }
            if let Some(command) = &resolution.command {
                println!("Command: {}", command);
            }
            println!("Time: {} ms", resolution.execution_time_ms);
            println!("\nReasoning Trace:");
            for (i, trace) in resolution.reasoning_trace.iter().enumerate() {
                println!("  {}: {}", i + 1, trace);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Resolution failed: {}", e);
            Err(Box::new(e) as Box<dyn std::error::Error>)
        }
    }
}
