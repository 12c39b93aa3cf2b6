use std::fmt::Write as _;

use anyhow::Context;
use colored::Colorize;
use tracing::debug;
use treecmp_diff::{Category, CompareOptions, DiffResult, EntryTypes, Expectation};

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let opts = resolve_options(&cli)?;
    let expectation = if cli.expect.is_empty() {
        None
    } else {
        Some(Expectation::parse(&cli.expect)?)
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting async runtime")?;
    let result = runtime
        .block_on(treecmp_diff::compare(&cli.left, &cli.right, opts))
        .with_context(|| {
            format!(
                "comparing {} with {}",
                cli.left.display(),
                cli.right.display()
            )
        })?;
    debug!("\n{result}");

    match cli.format {
        OutputFormat::Text => print!("{}", render_text(&result)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result.report())?),
    }

    if let Some(expectation) = expectation {
        expectation.verify(&result)?;
        eprintln!("{} expectations met", "✓".green().bold());
    }
    Ok(())
}

/// Options from the config file (or defaults) with command-line overrides.
pub fn resolve_options(cli: &Cli) -> anyhow::Result<CompareOptions> {
    let mut opts = match &cli.config {
        Some(path) => CompareOptions::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => CompareOptions::default(),
    };
    if let Some(n) = cli.concurrency {
        anyhow::ensure!(n > 0, "concurrency must be at least 1");
        opts = opts.with_concurrency(n);
    }
    if let Some(types) = &cli.types {
        opts = opts.with_types(EntryTypes::from_names(types)?);
    }
    if cli.follow {
        opts.walk = opts.walk.following_symlinks(true);
    }
    if cli.trust_mtime {
        opts.trust_mtime = true;
    }
    opts.validate()?;
    Ok(opts)
}

pub fn render_text(result: &DiffResult) -> String {
    let mut out = String::new();
    for category in Category::ALL {
        let paths = result.paths(category);
        if paths.is_empty() {
            continue;
        }
        let header = format!("{} ({})", category.label(), paths.len());
        let header = match category {
            Category::CommonDirs | Category::CommonFiles => header.green(),
            Category::Different => header.yellow(),
            Category::Funny => header.red(),
            _ => header.cyan(),
        };
        let _ = writeln!(out, "{}", header.bold());

        for path in paths {
            let note = match category {
                Category::Different => result.different().get(&path).map(|c| c.cause.to_string()),
                Category::Funny => result.funny().get(&path).map(|f| f.reason.to_string()),
                _ => None,
            };
            match note {
                Some(note) => {
                    let _ = writeln!(out, "  {}  {}", path, note.dimmed());
                }
                None => {
                    let _ = writeln!(out, "  {path}");
                }
            }
        }
    }

    if result.is_identical() {
        let _ = writeln!(out, "{} trees are identical", "✓".green().bold());
    } else {
        let changed = result.len()
            - result.count(Category::CommonDirs)
            - result.count(Category::CommonFiles);
        let _ = writeln!(out, "{} {} paths differ", "✗".red().bold(), changed);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::fs;

    fn trees() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for side in ["l", "r"] {
            fs::create_dir_all(dir.path().join(side).join("a")).unwrap();
            fs::write(dir.path().join(side).join("a/x.txt"), b"hi").unwrap();
        }
        fs::write(dir.path().join("l/c.txt"), b"foo").unwrap();
        fs::write(dir.path().join("r/c.txt"), b"bar").unwrap();
        dir
    }

    fn cli(dir: &tempfile::TempDir, extra: &[&str]) -> Cli {
        let l = dir.path().join("l");
        let r = dir.path().join("r");
        let mut args = vec![
            "treecmp".to_string(),
            l.to_string_lossy().into_owned(),
            r.to_string_lossy().into_owned(),
        ];
        args.extend(extra.iter().map(|s| s.to_string()));
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn flags_override_config_file() {
        let dir = trees();
        let config = dir.path().join("treecmp.toml");
        fs::write(&config, "chunk_size = 4096\n[walk]\nconcurrency = 7\n").unwrap();
        let config = config.to_string_lossy().into_owned();

        let from_file = resolve_options(&cli(&dir, &["--config", &config])).unwrap();
        assert_eq!(from_file.chunk_size, 4096);
        assert_eq!(from_file.walk.concurrency, 7);

        let args = ["--config", config.as_str(), "-j", "2", "--types", "file", "-L"];
        let overridden = resolve_options(&cli(&dir, &args)).unwrap();
        assert_eq!(overridden.walk.concurrency, 2);
        assert_eq!(overridden.walk.types, EntryTypes::FILE);
        assert!(overridden.walk.follow_symlinks);
        assert_eq!(overridden.chunk_size, 4096);
    }

    #[test]
    fn bad_flags_are_rejected() {
        let dir = trees();
        assert!(resolve_options(&cli(&dir, &["-j", "0"])).is_err());
        assert!(resolve_options(&cli(&dir, &["--types", "bogus"])).is_err());
    }

    #[test]
    fn expectations_pass_and_fail() {
        let dir = trees();
        let ok = cli(&dir, &["--expect", "cd=a", "cf=a/x.txt", "diff=c.txt"]);
        assert!(run_command(ok).is_ok());

        let wrong = cli(&dir, &["--expect", "cd=a", "cf=a/x.txt"]);
        let err = run_command(wrong).unwrap_err();
        assert!(err.to_string().contains("c.txt"), "{err}");
    }

    #[test]
    fn missing_root_fails() {
        let dir = trees();
        fs::remove_dir_all(dir.path().join("r")).unwrap();
        assert!(run_command(cli(&dir, &[])).is_err());
    }

    #[test]
    fn text_report_lists_differences() {
        colored::control::set_override(false);
        let dir = trees();
        let opts = resolve_options(&cli(&dir, &[])).unwrap();
        let result = tokio::runtime::Runtime::new()
            .unwrap()
            .block_on(treecmp_diff::compare(dir.path().join("l"), dir.path().join("r"), opts))
            .unwrap();

        let text = render_text(&result);
        assert!(text.contains("different files (1)"));
        assert!(text.contains("  c.txt  content differs at byte 0"));
        assert!(text.contains("common files (1)"));
        assert!(text.contains("1 paths differ"));
        assert!(!text.contains("funny"));
    }
}
