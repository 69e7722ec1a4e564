use stress_test::{stress_test_documents, stress_test_scaling, BoxError, StressConfig};
use tracing_subscriber::EnvFilter;
pub mod stress_test;

fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("seqcrdt=info".parse()?))
        .init();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async_main())
}

async fn async_main() -> Result<(), BoxError> {
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║            ASYNC STRESS TESTS                               ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    // Small scale
    let stats = stress_test_documents(StressConfig {
        replicas: 4,
        ops_per_replica: 100,
        sync_every: 10,
        random_syncs: 50,
        seed: 1,
    })
    .await?;
    stats.print();

    // Medium scale, syncing rarely so edits pile up concurrently
    let stats = stress_test_documents(StressConfig {
        replicas: 10,
        ops_per_replica: 300,
        sync_every: 50,
        random_syncs: 200,
        seed: 2,
    })
    .await?;
    stats.print();

    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║          SCALING ANALYSIS                                  ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    stress_test_scaling(12, 4, 3).await?;

    println!("\n✓ All stress tests completed successfully!");
    Ok(())
}
