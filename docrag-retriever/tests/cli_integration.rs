use anyhow::Result;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::{TempDir, tempdir};

const CONFIG: &str = r#"
[embedding]
provider = "hashing"
dimension = 256

[logging]
level = "error"
"#;

/// A document tree plus a config file kept outside it.
struct Workspace {
    docs: TempDir,
    config_dir: TempDir,
}

impl Workspace {
    fn new() -> Result<Self> {
        let docs = tempdir()?;
        std::fs::write(docs.path().join("a.txt"), "Paris is the capital of France.")?;
        std::fs::write(
            docs.path().join("b.md"),
            "# Fruit\n\nBananas are rich in potassium.",
        )?;
        std::fs::write(docs.path().join("broken.pdf"), "%PDF-1.4\nnot a pdf")?;

        let config_dir = tempdir()?;
        std::fs::write(config_dir.path().join("docrag.toml"), CONFIG)?;
        Ok(Self { docs, config_dir })
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        run_cli(
            &self.config_dir.path().join("docrag.toml"),
            self.docs.path(),
            args,
        )
    }
}

/// Helper to run the CLI binary with given args
fn run_cli(config: &Path, root: &Path, args: &[&str]) -> Result<Output> {
    let output = Command::new(env!("CARGO_BIN_EXE_docrag"))
        .arg("--config")
        .arg(config)
        .arg("--root")
        .arg(root)
        .args(args)
        .env("RUST_LOG", "error")
        .output()?;
    Ok(output)
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_index_reports_counts() -> Result<()> {
    let workspace = Workspace::new()?;
    let output = workspace.run(&["index"])?;
    assert!(output.status.success(), "index failed: {output:?}");

    let text = stdout(&output);
    assert!(text.contains("Indexed 2 documents"), "unexpected output: {text}");
    assert!(text.contains("1 failed"));
    assert!(text.contains("failed: broken.pdf [extraction]"));
    Ok(())
}

#[test]
fn test_query_json_output() -> Result<()> {
    let workspace = Workspace::new()?;
    assert!(workspace.run(&["index"])?.status.success());

    let output = workspace.run(&[
        "query",
        "What is the capital of France?",
        "--format",
        "json",
    ])?;
    assert!(output.status.success(), "query failed: {output:?}");

    let result: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(result["question"], "What is the capital of France?");
    assert_eq!(result["passages"][0]["source_path"], "a.txt");
    assert!(result["passages"][0]["score"].as_f64().unwrap_or_default() >= 0.3);
    Ok(())
}

#[test]
fn test_query_full_output_renders_context() -> Result<()> {
    let workspace = Workspace::new()?;
    assert!(workspace.run(&["index"])?.status.success());

    let output = workspace.run(&["query", "capital of France", "--format", "full"])?;
    assert!(output.status.success());
    assert!(stdout(&output).starts_with("[Source: a.txt]\nParis"));
    Ok(())
}

#[test]
fn test_status_and_list() -> Result<()> {
    let workspace = Workspace::new()?;
    assert!(workspace.run(&["index"])?.status.success());

    let output = workspace.run(&["status", "--format", "json"])?;
    assert!(output.status.success());
    let status: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(status["index"]["indexed_documents"], 2);
    assert_eq!(status["index"]["failed_documents"], 1);
    assert_eq!(status["index"]["embedding_model"], "hashing:256");
    assert_eq!(status["database"]["database_type"], "SQLite");

    let output = workspace.run(&["list"])?;
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("Text (2)"), "unexpected listing: {text}");
    assert!(text.contains("  a.txt (31 B)"));
    assert!(!text.contains("broken.pdf"));

    let output = workspace.run(&["cache-stats"])?;
    assert!(output.status.success());
    assert!(stdout(&output).contains("Total documents: 2"));
    Ok(())
}

#[test]
fn test_invalid_format_and_bad_config_fail() -> Result<()> {
    let workspace = Workspace::new()?;
    let output = workspace.run(&["status", "--format", "yaml"])?;
    assert!(!output.status.success());

    std::fs::write(
        workspace.config_dir.path().join("bad.toml"),
        "[retrieval]\ntop_k = 0\n",
    )?;
    let output = run_cli(
        &workspace.config_dir.path().join("bad.toml"),
        workspace.docs.path(),
        &["status"],
    )?;
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).starts_with("Error:"));
    Ok(())
}
