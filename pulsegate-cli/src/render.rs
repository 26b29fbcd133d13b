use colored::*;
use pulsegate::{ChannelState, DashboardView, EventLevel, Severity, Trend};
use std::fmt::Write;

const EVENTS_SHOWN: usize = 10;

fn channel_label(state: ChannelState) -> ColoredString {
    match state {
        ChannelState::Connected => "live".green(),
        ChannelState::Connecting => "connecting".yellow(),
        ChannelState::Disconnected => "polling only".yellow(),
        ChannelState::Error => "error".red(),
    }
}

fn trend_arrow(trend: Trend) -> &'static str {
    match trend {
        Trend::Increasing => "↑",
        Trend::Decreasing => "↓",
        Trend::Stable => "→",
    }
}

fn severity_tag(severity: Severity) -> ColoredString {
    match severity {
        Severity::Good => "[GOOD]".green().bold(),
        Severity::Warn => "[WARN]".yellow().bold(),
        Severity::Bad => "[BAD] ".red().bold(),
    }
}

fn level_tag(level: EventLevel) -> ColoredString {
    match level {
        EventLevel::Error => "ERROR".red(),
        EventLevel::Warning => "WARN ".yellow(),
        EventLevel::Info => "INFO ".normal(),
        EventLevel::Debug => "DEBUG".dimmed(),
    }
}

fn stale_mark(stale: bool) -> ColoredString {
    if stale { " (stale)".yellow() } else { "".normal() }
}

pub fn format_view(view: &DashboardView) -> String {
    let mut out = String::new();
    let polled = view
        .last_poll
        .map(|ts| ts.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "never".to_string());
    let _ = writeln!(
        out,
        "{}  last poll {}  stream: {}",
        "pulsegate".bold().cyan(),
        polled,
        channel_label(view.channel)
    );

    if let Some(banner) = &view.banner {
        let _ = writeln!(out, "{}", format!("!! {banner}").red().bold());
    }
    let _ = writeln!(out);

    if let Some(snaps) = &view.snapshots {
        let res = &snaps.resources;
        let (cpu_trend, mem_trend) = view
            .kpi
            .as_ref()
            .map(|k| (trend_arrow(k.cpu_trend), trend_arrow(k.memory_trend)))
            .unwrap_or(("-", "-"));
        let _ = writeln!(
            out,
            "{:<12} cpu {:>5.1}% {}  mem {:>5.1}% {}  disk {:>5.1}%  conns {}{}",
            "Resources",
            res.value.cpu_pct(),
            cpu_trend,
            res.value.mem_pct(),
            mem_trend,
            res.value.disk_pct(),
            res.value.network_connections(),
            stale_mark(res.stale)
        );

        let engine = snaps.ai_engine();
        let procs = &snaps.processes;
        let _ = writeln!(
            out,
            "{:<12} queue {}  success {:.1}%  avg {:.0} ms  ({} running, {} failed){}",
            "AI engine",
            engine.queue_length,
            engine.success_rate,
            engine.avg_processing_ms,
            procs.value.summary.running,
            procs.value.summary.failed,
            stale_mark(procs.stale)
        );

        let uptime = &snaps.uptime;
        let _ = writeln!(
            out,
            "{:<12} {}s  response {:.0} ms{}",
            "Uptime",
            uptime.value.uptime_secs,
            uptime.value.response_time_ms,
            stale_mark(uptime.stale)
        );

        let db = &snaps.database;
        let db_label = if db.value.healthy { "healthy".green() } else { "unavailable".red() };
        let _ = writeln!(out, "{:<12} {}{}", "Database", db_label, stale_mark(db.stale));

        let analysis = &snaps.analysis;
        let _ = writeln!(
            out,
            "{:<12} {} total, {} today, avg confidence {:.1}{}",
            "Analyses",
            analysis.value.total,
            analysis.value.today,
            analysis.value.avg_confidence,
            stale_mark(analysis.stale)
        );

        let prompts = &snaps.prompts;
        let _ = writeln!(
            out,
            "{:<12} {} total, {} today{}",
            "Prompts",
            prompts.value.total,
            prompts.value.today,
            stale_mark(prompts.stale)
        );

        let sec = &snaps.security;
        let _ = writeln!(
            out,
            "{:<12} {:.0}% ({}/{} headers){}",
            "Security",
            sec.value.score,
            sec.value.present,
            sec.value.required,
            stale_mark(sec.stale)
        );
    } else {
        let _ = writeln!(out, "{}", "no data yet".dimmed());
    }

    if let Some(rate) = view.kpi.as_ref().and_then(|k| k.high_confidence_rate) {
        let _ = writeln!(out, "{:<12} {:.1}%", "High conf.", rate * 100.0);
    }

    let failed: Vec<&str> = view
        .sources
        .iter()
        .filter(|s| s.stale)
        .map(|s| s.name)
        .collect();
    if !failed.is_empty() {
        let _ = writeln!(out, "{:<12} {}", "Stale", failed.join(", ").yellow());
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "{}", "Insights".bold());
    for insight in &view.insights {
        let _ = writeln!(
            out,
            "  {} {}: {}",
            severity_tag(insight.severity),
            insight.title,
            insight.detail.dimmed()
        );
    }

    if !view.recent_events.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", "Recent events".bold());
        for event in view.recent_events.iter().take(EVENTS_SHOWN) {
            let _ = writeln!(
                out,
                "  {} {} [{}] {}",
                event.timestamp.format("%H:%M:%S"),
                level_tag(event.level),
                event.source,
                event.message
            );
        }
    }

    let m = &view.metrics;
    let _ = write!(
        out,
        "{}",
        format!(
            "\npolls {}  fetch failures {}  stream errors {}  discarded {}{}",
            m.polls_total,
            m.fetch_failures,
            m.stream_errors,
            m.stale_results_discarded,
            if m.fallback_active { "  (fallback polling)" } else { "" }
        )
        .dimmed()
    );
    out
}
