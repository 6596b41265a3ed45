//! Example: summarize any git, hg or svn repository
//!
//! Run with: cargo run --example inspect -- <path> [revision]
//!
//! Set `POLYVCS_CONFIG` to a TOML file to override the defaults and
//! `RUST_LOG=polyvcs=trace` to see every native command.

use std::path::PathBuf;

use polyvcs::{LogOptions, LsOptions, LsReport, RevSpec, VcsConfig, VcsFactory};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    utils::logging::init("info");

    let mut args = std::env::args().skip(1);
    let path = PathBuf::from(args.next().ok_or("usage: inspect <path> [revision]")?);
    let config = match std::env::var_os("POLYVCS_CONFIG") {
        Some(file) => VcsConfig::from_file(file.as_ref())?,
        None => VcsConfig::default(),
    };

    let repo = VcsFactory::new(config).open(&path)?;
    println!("{}", repo.description());

    for (label, refs) in [("branch", repo.branches()?), ("tag", repo.tags()?)] {
        for (name, rev) in refs {
            println!("{label:>6} {name} -> {rev}");
        }
    }

    let rev = match args.next() {
        Some(name) => RevSpec::from(name),
        None if repo.is_working_copy() => RevSpec::Current,
        None => match repo.heads()?.into_values().next() {
            Some(head) => RevSpec::Exact(head),
            None => {
                println!("(empty repository)");
                return Ok(());
            }
        },
    };

    println!();
    for entry in repo.log(&LogOptions::from_rev(rev.clone()).with_limit(10))? {
        let entry = entry?;
        println!(
            "{} {} {} {}",
            entry.revision,
            entry.date.format("%Y-%m-%d"),
            entry.author,
            entry.subject()
        );
    }

    println!();
    let report = LsReport {
        size: true,
        target: true,
        ..LsReport::default()
    };
    for entry in repo.ls(&rev, "", &LsOptions::default().with_report(report))? {
        let detail = match (&entry.target, entry.size) {
            (Some(target), _) => format!("-> {target}"),
            (None, Some(size)) => format!("{size} bytes"),
            (None, None) => String::new(),
        };
        println!("{:>9} {} {}", entry.kind, entry.name, detail);
    }

    let stats = repo.cache_stats();
    tracing::info!(hits = stats.hits, misses = stats.misses, "Done");
    Ok(())
}
