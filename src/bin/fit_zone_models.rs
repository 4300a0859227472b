use std::path::PathBuf;

use anyhow::{Context, Result};

use zone_discipline::config::EngineConfig;
use zone_discipline::dataset_store::{load_dataset, open_db};
use zone_discipline::model_store::save_model_set;
use zone_discipline::modeler::{FitStatus, fit};

fn main() -> Result<()> {
    zone_discipline::init_tracing();
    let config = EngineConfig::load();

    let db_path = parse_path_arg("--db")
        .or_else(|| config.db_path.clone())
        .context("unable to resolve sqlite path")?;
    let out_path = parse_path_arg("--out")
        .or_else(|| config.model_path.clone())
        .context("unable to resolve model artifact path")?;

    let conn = open_db(&db_path)?;
    let dataset = load_dataset(&conn)?;
    let set = fit(&dataset, &config.fit)?;
    save_model_set(&out_path, &set)?;

    let diag = set.diagnostics();
    println!("Zone model fit complete");
    println!("Artifact: {}", out_path.display());
    println!("Feature set: {}", set.schema.version);
    println!(
        "Zones: {}/{} analyzed, convergence {:.0}%, overdispersed {}",
        diag.zones_analyzed,
        diag.zones_total,
        diag.convergence_rate * 100.0,
        diag.overdispersed_zones
    );
    if let Some(aic) = diag.average_aic {
        println!("Average AIC: {aic:.1}");
    }
    for model in &set.models {
        let status = match &model.diagnostics.status {
            FitStatus::Fitted => format!(
                "fitted n={} alpha={:.3} referees={}",
                model.diagnostics.n_obs,
                model.alpha,
                model.referee_weights.len()
            ),
            FitStatus::InsufficientData { samples, events, .. } => {
                format!("insufficient data ({samples} rows, {events} fouls)")
            }
            FitStatus::ConvergenceFailed { reason } => format!("failed: {reason}"),
        };
        println!("  {:<8} {}", model.zone.label(), status);
    }
    for (feature, share) in &diag.feature_significance {
        println!("  z_{feature}: significant in {:.0}% of zones", share * 100.0);
    }
    Ok(())
}

fn parse_path_arg(name: &str) -> Option<PathBuf> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let prefix = format!("{name}=");
    for (idx, arg) in args.iter().enumerate() {
        if let Some(v) = arg.strip_prefix(&prefix)
            && !v.trim().is_empty()
        {
            return Some(PathBuf::from(v));
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(PathBuf::from(next));
        }
    }
    None
}
