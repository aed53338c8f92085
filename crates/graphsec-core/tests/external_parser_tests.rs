#![cfg(unix)]

mod common;

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use common::{config, nodes, write_repo};
use graphsec_core::config::Config;
use graphsec_core::error::{IngestError, ItemErrorKind};
use graphsec_core::graph::{schema, GraphStore, MemoryGraphStore, RelationshipFilter};
use graphsec_core::{IngestionRequest, IngestionService, IngestionState};

const TOOL_OUTPUT: &str = r#"{"type":"node","id":"m","kind":"module","name":"main","full_path":"./src/app/main.py"}
{"type":"node","id":"h","kind":"function","name":"handle","full_path":"./src/app/main.py","start_line":1,"end_line":2,"language":"python"}
{"type":"node","id":"o","kind":"Function","name":"orphan","path":"other/file.py"}
{"type":"edge","from":"m","to":"h"}
{"type":"edge","from":"h","to":"ghost","rel":"calls"}
this line is not json
"#;

/// An executable script printing `output` regardless of its arguments.
fn tool(dir: &Path, output: &str) -> PathBuf {
    let script = dir.join("ast-dump");
    std::fs::write(
        &script,
        format!("#!/bin/sh\ncat <<'EOF'\n{}EOF\n", output),
    )
    .unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    script
}

fn external_config(command: Option<&Path>) -> Config {
    let mut config = config();
    config.ingestion.parser = "external".to_string();
    config.parser.external.command = command.map(|c| c.to_string_lossy().into_owned());
    config.parser.external.native_platforms = vec![std::env::consts::OS.to_string()];
    config
}

fn parse_only(path: &Path) -> IngestionRequest {
    IngestionRequest {
        parse_only: true,
        ingestion_id: Some("ext".to_string()),
        ..IngestionRequest::local(path)
    }
}

#[tokio::test]
async fn test_tool_output_becomes_graph() {
    let repo = write_repo(&[("src/app/main.py", "def handle():\n    pass\n")]);
    let bin = TempDir::new().unwrap();
    let script = tool(bin.path(), TOOL_OUTPUT);
    let store: Arc<dyn GraphStore> = Arc::new(MemoryGraphStore::new());
    let service = IngestionService::new(external_config(Some(&script)), store.clone(), None);

    let status = service.run_ingestion(parse_only(repo.path())).await.unwrap();

    assert_eq!(status.state, IngestionState::CompletedWithErrors);
    assert_eq!(status.parsing_stats.parser, "external");
    assert_eq!(status.parsing_stats.nodes_created, 3);
    assert_eq!(status.parsing_stats.files_parsed, 2);
    assert_eq!(status.errors.len(), 1);
    assert_eq!(status.errors[0].kind, ItemErrorKind::Parse);
    assert_eq!(status.errors[0].item_id, "external:6");

    let ast = nodes(&store, "ext", schema::AST_NODE).await;
    assert_eq!(ast.len(), 3);
    let handle = ast.iter().find(|n| n.prop_str("name") == Some("handle")).unwrap();
    assert!(handle.has_label("Function"));
    assert_eq!(handle.prop_str(schema::MAPPING_STATUS), Some(schema::STATUS_MAPPED));
    let orphan = ast.iter().find(|n| n.prop_str("name") == Some("orphan")).unwrap();
    assert_eq!(orphan.prop_str(schema::MAPPING_STATUS), Some(schema::STATUS_UNMAPPED));

    let file = &nodes(&store, "ext", schema::FILE).await[0];
    assert_eq!(file.prop_str("path"), Some("src/app/main.py"));
    let part_of = store
        .find_relationships(&RelationshipFilter::of_type(schema::PART_OF).from_node(&handle.id))
        .await
        .unwrap();
    assert_eq!(part_of.len(), 1);
    assert_eq!(part_of[0].to, file.id);

    let declares = store
        .find_relationships(&RelationshipFilter::of_type(schema::DECLARES).in_scope("ext"))
        .await
        .unwrap();
    assert_eq!(declares.len(), 1);
    assert_eq!(declares[0].to, handle.id);
    let calls = store
        .find_relationships(&RelationshipFilter::of_type(schema::CALLS))
        .await
        .unwrap();
    assert!(calls.is_empty());
}

#[tokio::test]
async fn test_failing_tool_fails_run() {
    let repo = write_repo(&[("main.py", "x = 1\n")]);
    let bin = TempDir::new().unwrap();
    let script = bin.path().join("broken");
    std::fs::write(&script, "#!/bin/sh\necho boom >&2\nexit 3\n").unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    let service = IngestionService::new(
        external_config(Some(&script)),
        Arc::new(MemoryGraphStore::new()),
        None,
    );

    let status = service.run_ingestion(parse_only(repo.path())).await.unwrap();

    assert_eq!(status.state, IngestionState::Failed);
    assert!(status.failure.unwrap().contains("boom"));
}

#[tokio::test]
async fn test_unconfigured_tool_is_unavailable() {
    let repo = write_repo(&[("main.py", "x = 1\n")]);
    let service = IngestionService::new(
        external_config(None),
        Arc::new(MemoryGraphStore::new()),
        None,
    );

    let status = service.run_ingestion(parse_only(repo.path())).await.unwrap();

    assert_eq!(status.state, IngestionState::Failed);
    assert!(status.failure.unwrap().contains("unavailable"));
}

#[tokio::test]
async fn test_unknown_parser_rejected_up_front() {
    let mut config = config();
    config.ingestion.parser = "clang".to_string();
    let service = IngestionService::new(config, Arc::new(MemoryGraphStore::new()), None);

    let result = service.start_ingestion(parse_only(Path::new(".")));
    assert!(matches!(
        result,
        Err(IngestError::ParserUnavailable { name, .. }) if name == "clang"
    ));
}
