//! Example composing sequential, parallel and per-item steps
//!
//! Also shows that a retry configuration can be loaded from JSON.

use std::time::Duration;

use taskweave::{
    chunk, fallback, json, logged, manual, parallel, serial, sleep, task_fn, waterfall, Args,
    FlowError, RetryConfig, Step, Task, TaskExt,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "taskweave=debug".into()),
        )
        .init();

    let config: RetryConfig = serde_json::from_str(r#"{ "attempts": 3, "factor": 2.0 }"#)?;
    config.validate()?;
    println!("Loaded retry config: {config:?}");

    let halve = task_fn(|args: Args| async move {
        let x = args[0].as_f64().unwrap_or_default();
        Ok(vec![json!(x / 2.0), json!(x * 2.0)])
    });
    let sum = task_fn(|args: Args| async move {
        let total = args.iter().filter_map(|value| value.as_f64()).sum::<f64>();
        Ok(vec![json!(total)])
    });
    let flow = waterfall([logged("halve", halve).boxed(), logged("sum", sum).boxed()]);
    println!("waterfall(4) = {:?}", flow.call(vec![json!(4)]).await?);

    let broken = fallback(
        vec![json!("default")],
        task_fn(|_| async { Err(FlowError::task("unreachable host")) }),
    );
    let fan_out = parallel([sleep(Duration::from_millis(20)).boxed(), broken.boxed()]);
    println!("parallel(\"in\") = {:?}", fan_out.call(vec![json!("in")]).await?);

    let steps = serial([
        task_fn(|_| async { Ok(vec![json!(1)]) }).boxed(),
        task_fn(|_| async { Ok(vec![json!(2), json!(3)]) }).boxed(),
    ]);
    println!("serial() = {:?}", steps.call(vec![]).await?);

    let squares = chunk(
        2,
        task_fn(|args: Args| async move {
            let x = args[0].as_i64().unwrap_or_default();
            Ok(vec![json!(x * x)])
        }),
    )?;
    println!("chunk(2) = {:?}", squares.call(vec![json!([1, 2, 3, 4, 5])]).await?);

    let countdown = manual()
        .state("tick", |args: Args| async move {
            let n = args[0].as_i64().unwrap_or_default();
            if n == 0 {
                Ok(Step::goto("liftoff", vec![]))
            } else {
                println!("  {n}...");
                Ok(Step::goto("tick", vec![json!(n - 1)]))
            }
        })
        .state("liftoff", |_| async { Ok(Step::end(vec![json!("liftoff")])) })
        .build()?;
    println!("manual = {:?}", countdown.call(vec![json!(3)]).await?);

    Ok(())
}
