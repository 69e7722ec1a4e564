use async_stream::stream;
use futures::stream::Stream;
use futures::stream::StreamExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use seqcrdt_core::ActorId;
use seqcrdt_doc::{Change, Document};
use seqcrdt_gc::StabilityTracker;
use seqcrdt_tree::TreeNodeSpec;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

const TEXT_KEY: &str = "content";
const TREE_KEY: &str = "outline";

/// Parameters of one stress run.
#[derive(Clone, Debug)]
pub struct StressConfig {
    pub replicas: usize,
    pub ops_per_replica: usize,
    /// Every replica syncs with the log after this many local edits.
    pub sync_every: usize,
    /// Extra syncs of randomly chosen replicas before the final round.
    pub random_syncs: usize,
    pub seed: u64,
}

/// Statistics collected during stress testing
#[derive(Clone, Debug)]
pub struct StressTestStats {
    pub num_replicas: usize,
    pub operations_per_replica: usize,
    pub total_syncs: usize,
    pub changes_logged: usize,
    pub evicted: usize,
    /// GC pairs each replica still holds; the same on every replica.
    pub garbage_left: usize,
    pub total_time: Duration,
    pub avg_sync_time: Duration,
    pub ops_per_second: f64,
}

impl StressTestStats {
    pub fn print(&self) {
        println!("\n╔════════════════════════════════════════════════════════════╗");
        println!("║              Stress Test Statistics                         ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║  Number of Replicas:        {:>38} ║", self.num_replicas);
        println!("║  Operations per Replica:    {:>38} ║", self.operations_per_replica);
        println!("║  Total Sync Operations:     {:>38} ║", self.total_syncs);
        println!("║  Changes Logged:            {:>38} ║", self.changes_logged);
        println!("║  GC Pairs Evicted:          {:>38} ║", self.evicted);
        println!("║  GC Pairs Left per Replica: {:>38} ║", self.garbage_left);
        println!("║  Total Time:                {:>39}s ║", format!("{:.3}", self.total_time.as_secs_f64()));
        println!("║  Average Sync Time:         {:>36}µs ║", format!("{:.2}", self.avg_sync_time.as_micros()));
        println!("║  Operations/Second:         {:>38.0} ║", self.ops_per_second);
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

/// A document plus how far into the shared log it has read.
struct Replica {
    doc: Document,
    cursor: usize,
}

/// Shared append-only log of changes. Every replica pushes its own changes
/// before reading, so the log order respects causality.
type ChangeLog = Arc<Mutex<Vec<Change>>>;

/// Push local changes to the log, then apply everything not yet read.
async fn sync_replica(replica: &Mutex<Replica>, log: &ChangeLog) -> Result<usize, BoxError> {
    let mut replica = replica.lock().await;
    let mut log = log.lock().await;

    let local = replica.doc.take_local_changes();
    log.extend(local);

    let pending = &log[replica.cursor..];
    replica.doc.apply_changes(pending)?;
    let pulled = pending.len();
    replica.cursor = log.len();
    Ok(pulled)
}

/// Generator that yields replica indices for synchronization patterns
fn replica_sync_generator(num_replicas: usize, num_syncs: usize, seed: u64) -> impl Stream<Item = usize> {
    stream! {
        let mut rng = StdRng::seed_from_u64(seed);
        for _ in 0..num_syncs {
            yield rng.gen_range(0..num_replicas);
        }
    }
}

fn random_word(rng: &mut StdRng) -> String {
    let len = rng.gen_range(1..4);
    (0..len).map(|_| rng.gen_range(b'a'..=b'z') as char).collect()
}

/// One random edit on the text or the tree.
fn random_edit(doc: &mut Document, rng: &mut StdRng) -> Result<(), BoxError> {
    let roll: f64 = rng.gen();
    doc.update(|ctx| {
        if roll < 0.7 {
            let mut text = ctx.get_text(TEXT_KEY)?;
            let len = text.len()?;
            let from = rng.gen_range(0..=len);
            if roll < 0.4 || len == 0 {
                text.edit(from, from, &random_word(rng), None)?;
            } else if roll < 0.6 {
                let to = (from + rng.gen_range(1..4)).min(len);
                text.delete(from, to)?;
            } else {
                let to = (from + rng.gen_range(1..6)).min(len);
                let attrs: BTreeMap<_, _> = [("bold".to_string(), json!(rng.gen_bool(0.5)))].into();
                text.set_style(from, to, &attrs)?;
            }
        } else {
            let mut tree = ctx.get_tree(TREE_KEY)?;
            let len = tree.len()?;
            if roll < 0.97 && len > 0 && rng.gen_bool(0.5) {
                // Index 1 sits just inside the first paragraph.
                tree.edit(1, 1, vec![TreeNodeSpec::text(random_word(rng))])?;
            } else if roll < 0.97 {
                tree.edit(0, 0, vec![TreeNodeSpec::element("p", vec![TreeNodeSpec::text(random_word(rng))])])?;
            } else {
                tree.edit(0, len, vec![])?;
            }
        }
        Ok(())
    })?;
    Ok(())
}

/// Concurrent editing across replicas, followed by a convergence check and a
/// GC pass at the stable vector.
pub async fn stress_test_documents(config: StressConfig) -> Result<StressTestStats, BoxError> {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║        Document Stress Test (Async)                        ║");
    println!("║  Replicas: {} | Ops/Replica: {} | Seed: {} ║",
             config.replicas, config.ops_per_replica, config.seed);
    println!("╚════════════════════════════════════════════════════════════╝");

    let start = Instant::now();
    let log: ChangeLog = Arc::new(Mutex::new(Vec::new()));

    // Initialize replicas
    let mut replicas: Vec<Arc<Mutex<Replica>>> = Vec::with_capacity(config.replicas);
    for idx in 0..config.replicas {
        let doc = Document::new(ActorId::new(format!("replica-{:03}", idx)));
        replicas.push(Arc::new(Mutex::new(Replica { doc, cursor: 0 })));
    }

    if let Some(first) = replicas.first() {
        first.lock().await.doc.update(|ctx| {
            ctx.create_text(TEXT_KEY)?;
            ctx.create_tree(TREE_KEY, "doc")?;
            Ok(())
        })?;
    }
    for replica in &replicas {
        sync_replica(replica, &log).await?;
    }

    println!("\n[Phase 1/3] Editing replicas concurrently...");

    let mut handles = vec![];
    for (idx, replica) in replicas.iter().enumerate() {
        let replica = Arc::clone(replica);
        let log = Arc::clone(&log);
        let config = config.clone();
        let handle = tokio::spawn(async move {
            let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(idx as u64));
            let mut sync_times = vec![];
            for i in 0..config.ops_per_replica {
                {
                    let mut guard = replica.lock().await;
                    random_edit(&mut guard.doc, &mut rng)?;
                }
                if (i + 1) % config.sync_every == 0 {
                    let sync_start = Instant::now();
                    let pulled = sync_replica(&replica, &log).await?;
                    sync_times.push(sync_start.elapsed());
                    debug!(replica = idx, pulled, "synced");
                }
                tokio::task::yield_now().await;
            }
            Ok::<_, BoxError>(sync_times)
        });
        handles.push(handle);
    }

    let mut sync_times = vec![];
    for handle in handles {
        sync_times.extend(handle.await??);
    }

    println!("[Phase 1/3] ✓ Completed");
    println!("[Phase 2/3] Synchronizing replicas...");

    let mut sync_gen = Box::pin(replica_sync_generator(config.replicas, config.random_syncs, config.seed));
    while let Some(idx) = sync_gen.next().await {
        let sync_start = Instant::now();
        sync_replica(&replicas[idx], &log).await?;
        sync_times.push(sync_start.elapsed());
    }
    // Two full rounds: the first publishes everything, the second delivers it.
    for _ in 0..2 {
        for replica in &replicas {
            let sync_start = Instant::now();
            sync_replica(replica, &log).await?;
            sync_times.push(sync_start.elapsed());
        }
    }

    let expected = replicas[0].lock().await.doc.to_json()?;
    for (idx, replica) in replicas.iter().enumerate() {
        let json = replica.lock().await.doc.to_json()?;
        if json != expected {
            return Err(format!("replica {} diverged", idx).into());
        }
    }

    println!("[Phase 2/3] ✓ Converged");
    println!("[Phase 3/3] Collecting garbage at the stable vector...");

    let mut tracker = StabilityTracker::new();
    for replica in &replicas {
        let guard = replica.lock().await;
        tracker.update(guard.doc.actor().clone(), guard.doc.version_vector());
    }
    let stable = tracker.stable_vector().clone();

    let mut evicted = 0;
    let mut left = None;
    for replica in &replicas {
        let mut guard = replica.lock().await;
        evicted += guard.doc.garbage_collect(&stable);
        if guard.doc.to_json()? != expected {
            return Err(format!("replica {} changed after GC", guard.doc.actor().as_str()).into());
        }
        let state = (guard.doc.garbage_len(), guard.doc.doc_size());
        match &left {
            None => left = Some(state),
            Some(first) if *first != state => {
                return Err(format!(
                    "replica {} kept {} GC pairs, expected {}",
                    guard.doc.actor().as_str(),
                    state.0,
                    first.0
                )
                .into());
            }
            Some(_) => {}
        }
    }
    let garbage_left = left.map_or(0, |(len, _)| len);
    info!(evicted, garbage_left, "stress run garbage collected");

    println!("[Phase 3/3] ✓ Completed");

    let total_time = start.elapsed();
    let total_syncs = sync_times.len();
    let avg_sync_time = if !sync_times.is_empty() {
        sync_times.iter().sum::<Duration>() / sync_times.len() as u32
    } else {
        Duration::ZERO
    };
    let total_operations = config.replicas * config.ops_per_replica + total_syncs;
    let ops_per_second = total_operations as f64 / total_time.as_secs_f64();
    let changes_logged = log.lock().await.len();

    Ok(StressTestStats {
        num_replicas: config.replicas,
        operations_per_replica: config.ops_per_replica,
        total_syncs,
        changes_logged,
        evicted,
        garbage_left,
        total_time,
        avg_sync_time,
        ops_per_second,
    })
}

/// Repeat the document stress test over growing replica counts.
pub async fn stress_test_scaling(max_replicas: usize, step_size: usize, seed: u64) -> Result<(), BoxError> {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║      Scaling Analysis - Document Sync vs Replicas         ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    let mut current_replicas = step_size;
    while current_replicas <= max_replicas {
        let stats = stress_test_documents(StressConfig {
            replicas: current_replicas,
            ops_per_replica: 50,
            sync_every: 5,
            random_syncs: current_replicas * 10,
            seed,
        })
        .await?;
        stats.print();
        current_replicas += step_size;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_small_run_converges() {
        let stats = stress_test_documents(StressConfig {
            replicas: 3,
            ops_per_replica: 40,
            sync_every: 4,
            random_syncs: 10,
            seed: 7,
        })
        .await
        .unwrap();
        assert_eq!(stats.num_replicas, 3);
        assert!(stats.changes_logged >= 3 * 40);
        // Every replica evicted the same pairs.
        assert_eq!(stats.evicted % 3, 0);
    }
}
