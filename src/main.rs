use anyhow::Context;
use manifold_mof::bounds::{frame_potential_bound, welch_bound};
use manifold_mof::energy::{coherence, FramePotential, PCoherence};
use manifold_mof::{CancelToken, CmaConfig, Problem, RiemannianCmaPolicy, SearchPolicy};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== Manifold MOF ===");
    println!("Maximally orthogonal frames with Riemannian CMA-ES\n");

    let (d, n) = (2, 4);
    let problem = Problem::new(d, n)?;
    println!("Frame: {} vectors in C^{}", n, d);
    println!("Welch bound: {:.10}", welch_bound(d, n));
    println!("Frame potential bound (t = 2): {:.10}\n", frame_potential_bound(d, n, 2));

    let policy = RiemannianCmaPolicy::new(CmaConfig::default().with_seed(7));
    let cancel = CancelToken::new();

    println!("=== Frame potential, t = 2 ===");
    let outcome = policy
        .propose(&problem, &FramePotential::new(2), &cancel)
        .context("frame potential search failed")?;
    println!("\nFinal Results:");
    println!("Stop: {:?}", outcome.stop);
    println!("Generations: {}", outcome.generations);
    println!("Energy: {:.10}", outcome.best_energy);
    println!("Coherence: {:.10}", coherence(&outcome.best_frame));

    println!("\n=== p-coherence, p = 16 ===");
    let start = problem.clone().with_start(outcome.best_frame)?;
    let outcome = policy
        .propose(&start, &PCoherence::new(16.0), &cancel)
        .context("p-coherence search failed")?;
    println!("\nFinal Results:");
    println!("Stop: {:?}", outcome.stop);
    println!("Generations: {}", outcome.generations);
    println!("Energy: {:.10}", outcome.best_energy);
    println!("Coherence: {:.10}", coherence(&outcome.best_frame));

    println!("\nBest frame:");
    for (i, row) in outcome.best_frame.vectors().outer_iter().enumerate() {
        let entries: Vec<String> = row.iter().map(|z| format!("{:+.6}{:+.6}i", z.re, z.im)).collect();
        println!("  f{} = [{}]", i, entries.join(", "));
    }

    Ok(())
}
