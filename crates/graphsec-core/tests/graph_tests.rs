mod common;

use std::sync::Arc;

use common::{config, write_repo};
use graphsec_core::graph::{
    schema, GraphError, GraphStore, MemoryGraphStore, NodeDraft, NodeFilter, RelationshipDraft,
    RelationshipFilter, SurrealGraphStore,
};
use graphsec_core::{IngestionRequest, IngestionService, IngestionState};

async fn backends() -> Vec<(&'static str, Arc<dyn GraphStore>)> {
    vec![
        ("memory", Arc::new(MemoryGraphStore::new()) as Arc<dyn GraphStore>),
        (
            "surreal",
            Arc::new(SurrealGraphStore::in_memory().await.unwrap()) as Arc<dyn GraphStore>,
        ),
    ]
}

#[tokio::test]
async fn test_merge_keeps_existing_properties() {
    for (name, store) in backends().await {
        store
            .create_node(
                NodeDraft::new("s", schema::AST_NODE)
                    .with_id("fn-1")
                    .with_label("Function")
                    .property("name", "login")
                    .property("mapping_status", "pending"),
            )
            .await
            .unwrap();
        store
            .create_node(
                NodeDraft::new("s", schema::AST_NODE)
                    .with_id("fn-1")
                    .property("mapping_status", "mapped"),
            )
            .await
            .unwrap();

        let node = store.get_node("fn-1").await.unwrap().unwrap();
        assert_eq!(node.prop_str("name"), Some("login"), "{}", name);
        assert_eq!(node.prop_str("mapping_status"), Some("mapped"), "{}", name);
        assert!(node.has_label("Function"), "{}", name);
        assert_eq!(store.stats().await.unwrap().nodes, 1, "{}", name);
    }
}

#[tokio::test]
async fn test_relationship_needs_endpoints() {
    for (name, store) in backends().await {
        store
            .create_node(NodeDraft::new("s", schema::FILE).with_id("file-1"))
            .await
            .unwrap();
        let result = store
            .create_relationship(RelationshipDraft::new(
                "file-1",
                schema::DEFINES,
                "missing",
                "s",
            ))
            .await;
        assert!(
            matches!(result, Err(GraphError::MissingEndpoint(_))),
            "{}: {:?}",
            name,
            result
        );
        assert_eq!(store.stats().await.unwrap().relationships, 0, "{}", name);
    }
}

#[tokio::test]
async fn test_pair_is_all_or_nothing() {
    for (name, store) in backends().await {
        for id in ["ast-1", "file-1"] {
            store
                .create_node(NodeDraft::new("s", schema::AST_NODE).with_id(id))
                .await
                .unwrap();
        }

        let broken = store
            .create_relationship_pair(
                RelationshipDraft::new("ast-1", schema::PART_OF, "file-1", "s"),
                RelationshipDraft::new("nowhere", schema::DEFINES, "ast-1", "s"),
            )
            .await;
        assert!(broken.is_err(), "{}", name);
        assert_eq!(store.stats().await.unwrap().relationships, 0, "{}", name);

        let (a, b) = store
            .create_relationship_pair(
                RelationshipDraft::new("ast-1", schema::PART_OF, "file-1", "s"),
                RelationshipDraft::new("file-1", schema::DEFINES, "ast-1", "s"),
            )
            .await
            .unwrap();
        assert_ne!(a, b);

        // Writing the same pair again merges.
        store
            .create_relationship_pair(
                RelationshipDraft::new("ast-1", schema::PART_OF, "file-1", "s"),
                RelationshipDraft::new("file-1", schema::DEFINES, "ast-1", "s"),
            )
            .await
            .unwrap();
        assert_eq!(store.stats().await.unwrap().relationships, 2, "{}", name);
    }
}

#[tokio::test]
async fn test_find_by_scope_and_property() {
    for (name, store) in backends().await {
        for (id, scope, status) in [
            ("a", "one", "mapped"),
            ("b", "one", "pending"),
            ("c", "two", "mapped"),
        ] {
            store
                .create_node(
                    NodeDraft::new(scope, schema::AST_NODE)
                        .with_id(id)
                        .property("mapping_status", status),
                )
                .await
                .unwrap();
        }

        let mapped_in_one = store
            .find_nodes(
                &NodeFilter::label(schema::AST_NODE)
                    .in_scope("one")
                    .where_eq("mapping_status", "mapped"),
            )
            .await
            .unwrap();
        assert_eq!(mapped_in_one.len(), 1, "{}", name);
        assert_eq!(mapped_in_one[0].id, "a");

        let scopes = vec!["one".to_string(), "two".to_string()];
        let all = store
            .find_nodes(&NodeFilter::label(schema::AST_NODE).in_scopes(&scopes))
            .await
            .unwrap();
        let ids: Vec<&str> = all.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"], "{}", name);
    }
}

#[tokio::test]
async fn test_delete_scope_removes_touching_relationships() {
    for (name, store) in backends().await {
        store
            .create_node(NodeDraft::new("repo", schema::AST_NODE).with_id("fn"))
            .await
            .unwrap();
        store
            .create_node(NodeDraft::new("inv", schema::SOURCE).with_id("src"))
            .await
            .unwrap();
        store
            .create_relationship(RelationshipDraft::new("src", schema::IDENTIFIES, "fn", "inv"))
            .await
            .unwrap();

        store.delete_scope("inv").await.unwrap();

        assert!(store.get_node("fn").await.unwrap().is_some(), "{}", name);
        assert!(store.get_node("src").await.unwrap().is_none(), "{}", name);
        let left = store
            .find_relationships(&RelationshipFilter::of_type(schema::IDENTIFIES))
            .await
            .unwrap();
        assert!(left.is_empty(), "{}", name);
    }
}

#[tokio::test]
async fn test_ingestion_into_surreal() {
    let repo = write_repo(&[(
        "svc/app.py",
        "def load():\n    return 1\n\n\ndef run():\n    return load()\n",
    )]);
    let store: Arc<dyn GraphStore> = Arc::new(SurrealGraphStore::in_memory().await.unwrap());
    let service = IngestionService::new(config(), store.clone(), None);

    let status = service
        .run_ingestion(IngestionRequest {
            parse_only: true,
            ingestion_id: Some("surreal".to_string()),
            ..IngestionRequest::local(repo.path())
        })
        .await
        .unwrap();

    assert_eq!(status.state, IngestionState::Completed);
    let functions = store
        .find_nodes(&NodeFilter::label("Function").in_scope("surreal"))
        .await
        .unwrap();
    assert_eq!(functions.len(), 2);
    let part_of = store
        .find_relationships(&RelationshipFilter::of_type(schema::PART_OF).in_scope("surreal"))
        .await
        .unwrap();
    // Two functions plus the module node.
    assert_eq!(part_of.len(), 3);
    let calls = store
        .find_relationships(&RelationshipFilter::of_type(schema::CALLS))
        .await
        .unwrap();
    assert_eq!(calls.len(), 1);
}

#[tokio::test]
async fn test_on_disk_store() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = SurrealGraphStore::open(&dir.path().join("graph")).await.unwrap();
    store
        .create_node(NodeDraft::new("s", schema::REPOSITORY).with_id("repository-s"))
        .await
        .unwrap();
    assert!(store.get_node("repository-s").await.unwrap().is_some());
}
