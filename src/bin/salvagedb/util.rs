use anyhow::Result;
use SalvageDB::RepairReport;

/// Колбэк прогресса, пишущий в лог каждые 10%.
pub fn progress_logger(label: &'static str) -> impl FnMut(f64, f64) -> bool {
    let mut next = 0.1;
    move |value, _inc| {
        if value >= next {
            log::info!("{}: progress {:.0}%", label, value * 100.0);
            while next <= value {
                next += 0.1;
            }
        }
        true
    }
}

/// Таблицы из повторяемого --table; пусто — без фильтра.
pub fn table_filter(tables: &[String]) -> impl Fn(&str) -> bool + '_ {
    move |name| tables.iter().any(|t| t == name)
}

pub fn print_report(report: &RepairReport, json: bool) -> Result<()> {
    let m = SalvageDB::metrics_snapshot();
    log::debug!(
        "metrics: pages_decoded={}, pages_corrupted={}, overflow={}, cache_hit_ratio={:.3}, materials written={} rejected={}",
        m.pages_decoded,
        m.pages_corrupted,
        m.overflow_pages_read,
        m.cache_hit_ratio(),
        m.materials_written,
        m.materials_rejected
    );
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!("Repair report:");
    println!("  source          = {}", report.source.display());
    println!("  destination     = {}", report.destination.display());
    println!("  score           = {:.4}", report.score);
    println!("  level           = {}", report.level);
    println!("  tables          = {} (failed: {})", report.tables, report.tables_failed.len());
    println!("  cells           = {} assembled, {} skipped", report.cells_assembled, report.cells_skipped);
    println!("  pages           = {} decoded, {} failed", report.pages_decoded, report.pages_failed);
    println!("  milestones      = {}", report.milestones);
    println!("  corruptions     = {}, checksums = {}", report.corruptions, report.checksums);
    println!("  wal frames      = {} valid, {} disposed", report.wal_frames, report.wal_disposed);
    if let Some(m) = &report.material {
        println!("  material        = {}", m.display());
    }
    if !report.fallback_tables.is_empty() {
        println!("  fallback tables = {}", report.fallback_tables.join(", "));
    }
    for t in &report.tables_failed {
        println!("  failed: {}", t);
    }
    if let Some(w) = &report.worst {
        println!("  worst           = {}", w);
    }
    Ok(())
}
