//! Example demonstrating data flow between dependent jobs
//!
//! Two downloads share a concurrency limit and a flaky step is retried; the
//! final job combines everything the graph produced.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use taskweave::{
    json, limit, retry, task_fn, Args, Auto, FlowError, LogReporter, RetryConfig, RetryPolicy,
    Task, TaskExt,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "taskweave=debug".into()),
        )
        .init();

    println!("=== Dependency Data Flow Example ===\n");

    let download = limit(
        1,
        task_fn(|args: Args| async move {
            let url = args[0].as_str().unwrap_or_default().to_string();
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(vec![json!(url.len()), json!(url)])
        }),
    )
    .boxed();

    let flaky_calls = Arc::new(AtomicU32::new(0));
    let counter = flaky_calls.clone();
    let checksum = retry(
        RetryPolicy::try_from(RetryConfig::new().with_timeout(Duration::from_millis(20)))?,
        task_fn(move |args: Args| {
            let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if call < 3 {
                    return Err(FlowError::task(format!("checksum service unavailable ({call})")));
                }
                let sizes = args.iter().filter_map(|pair| pair[0].as_u64()).sum::<u64>();
                Ok(vec![json!(sizes)])
            }
        }),
    );

    let first = download.clone();
    let second = download.clone();
    let graph = Auto::builder()
        .job("first", task_fn(move |_| first.call(vec![json!("https://example.com/a")])))
        .job("second", task_fn(move |_| second.call(vec![json!("https://example.com/bb")])))
        .job_after("checksum", ["first", "second"], checksum)
        .job_after(
            "report",
            ["checksum", "first"],
            task_fn(|args: Args| async move {
                Ok(vec![json!(format!("{} bytes, first from {}", args[0], args[1][1]))])
            }),
        )
        .build()?
        .with_reporter(LogReporter::with_context("example"));

    println!("Execution waves: {:?}", graph.graph().waves());

    let results = graph.run().await?;
    for (job, value) in &results {
        println!("  {job}: {value}");
    }
    println!("\nChecksum attempts: {}", flaky_calls.load(Ordering::SeqCst));

    Ok(())
}
