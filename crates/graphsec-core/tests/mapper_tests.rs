use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use graphsec_core::graph::{
    schema, GraphStore, MemoryGraphStore, NodeDraft, RelationshipFilter,
};
use graphsec_core::mapper::{AstFileMapper, FileEntry, MatchStrategy, PathMatch, PathMatcher};

fn matcher(case_sensitive: bool) -> PathMatcher {
    PathMatcher::new(
        vec![
            FileEntry {
                id: "main".to_string(),
                path: "src/app/main.py".to_string(),
                full_path: Some("/repo/src/app/main.py".to_string()),
            },
            FileEntry {
                id: "util".to_string(),
                path: "src/app/util.py".to_string(),
                full_path: Some("/repo/src/app/util.py".to_string()),
            },
        ],
        case_sensitive,
    )
}

fn unique(found: PathMatch) -> (String, MatchStrategy) {
    match found {
        PathMatch::Unique { file_id, strategy } => (file_id, strategy),
        other => panic!("expected a unique match, got {:?}", other),
    }
}

mod strategies {
    use super::*;

    #[test]
    fn test_exact() {
        let (id, strategy) = unique(matcher(true).find("src/app/main.py"));
        assert_eq!(id, "main");
        assert_eq!(strategy, MatchStrategy::Exact);

        let (id, strategy) = unique(matcher(true).find("/repo/src/app/util.py"));
        assert_eq!(id, "util");
        assert_eq!(strategy, MatchStrategy::Exact);
    }

    #[test]
    fn test_dot_prefixed_path() {
        let (id, _) = unique(matcher(true).find("./src/app/main.py"));
        assert_eq!(id, "main");
    }

    #[test]
    fn test_suffix() {
        let (id, strategy) = unique(matcher(true).find("app/main.py"));
        assert_eq!(id, "main");
        assert_eq!(strategy, MatchStrategy::Suffix);
    }

    #[test]
    fn test_container_prefix_is_suffix_match() {
        let (id, _) = unique(matcher(true).find("/workspace/src/app/main.py"));
        assert_eq!(id, "main");
    }

    #[test]
    fn test_windows_separators_normalized() {
        let (id, strategy) = unique(matcher(true).find("src\\app\\main.py"));
        assert_eq!(id, "main");
        assert_eq!(strategy, MatchStrategy::NormalizedExact);
    }

    #[test]
    fn test_case_insensitive() {
        let (id, _) = unique(matcher(false).find("APP/MAIN.PY"));
        assert_eq!(id, "main");
        assert_eq!(matcher(true).find("APP/MAIN.PY"), PathMatch::NoMatch);
    }

    #[test]
    fn test_bare_basename() {
        let (id, _) = unique(matcher(true).find("main.py"));
        assert_eq!(id, "main");
    }

    #[test]
    fn test_stem_without_extension() {
        let (id, strategy) = unique(matcher(true).find("lib/util"));
        assert_eq!(id, "util");
        assert_eq!(strategy, MatchStrategy::Stem);
    }

    #[test]
    fn test_unrelated_path() {
        assert_eq!(matcher(true).find("other/file.py"), PathMatch::NoMatch);
        assert_eq!(matcher(false).find(""), PathMatch::NoMatch);
    }

    #[test]
    fn test_ambiguous_basename() {
        let matcher = PathMatcher::new(
            vec![
                FileEntry {
                    id: "a".to_string(),
                    path: "a/config.py".to_string(),
                    full_path: None,
                },
                FileEntry {
                    id: "b".to_string(),
                    path: "b/config.py".to_string(),
                    full_path: None,
                },
            ],
            true,
        );
        match matcher.find("config.py") {
            PathMatch::Ambiguous { candidates } => assert_eq!(candidates, vec!["a", "b"]),
            other => panic!("expected ambiguity, got {:?}", other),
        }
    }
}

mod scope {
    use super::*;

    async fn ast(store: &MemoryGraphStore, key: &str, path: &str) -> String {
        store
            .create_node(
                NodeDraft::new("repo", schema::AST_NODE)
                    .with_label("Function")
                    .property("name", "handler")
                    .property(key, path),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_reported_paths_link_to_file() {
        let store = Arc::new(MemoryGraphStore::new());
        let file_id = store
            .create_node(
                NodeDraft::new("repo", schema::FILE)
                    .property("path", "src/app/main.py")
                    .property("full_path", "/tmp/checkout/src/app/main.py"),
            )
            .await
            .unwrap();

        let linked = vec![
            ast(&store, "file_path", "./src/app/main.py").await,
            ast(&store, "path", "APP/MAIN.PY").await,
            ast(&store, "full_path", "main.py").await,
        ];
        let orphan = ast(&store, "path", "other/file.py").await;

        let report = AstFileMapper::new(store.clone(), false)
            .map_scope("repo", &CancellationToken::new(), |_, _| {})
            .await
            .unwrap();

        assert_eq!(report.stats.total, 4);
        assert_eq!(report.stats.mapped, 3);
        assert_eq!(report.stats.unmapped, 1);
        assert!(report.errors.is_empty());

        for id in &linked {
            let part_of = store
                .find_relationships(&RelationshipFilter::of_type(schema::PART_OF).from_node(id))
                .await
                .unwrap();
            assert_eq!(part_of.len(), 1, "{} has no PART_OF", id);
            assert_eq!(part_of[0].to, file_id);

            let defines = store
                .find_relationships(&RelationshipFilter::of_type(schema::DEFINES).to_node(id))
                .await
                .unwrap();
            assert_eq!(defines.len(), 1, "{} has no DEFINES", id);
            assert_eq!(defines[0].from, file_id);

            let node = store.get_node(id).await.unwrap().unwrap();
            assert_eq!(node.prop_str(schema::MAPPED_FILE_ID), Some(file_id.as_str()));
        }

        let orphan = store.get_node(&orphan).await.unwrap().unwrap();
        assert_eq!(
            orphan.prop_str(schema::MAPPING_STATUS),
            Some(schema::STATUS_UNMAPPED)
        );
        assert_eq!(orphan.prop_str("source_path"), Some("other/file.py"));
        let dangling = store
            .find_relationships(&RelationshipFilter::of_type(schema::PART_OF).from_node(&orphan.id))
            .await
            .unwrap();
        assert!(dangling.is_empty());
    }

    #[tokio::test]
    async fn test_every_link_is_a_pair() {
        let store = Arc::new(MemoryGraphStore::new());
        for path in ["a.py", "pkg/b.py", "pkg/c.py"] {
            store
                .create_node(NodeDraft::new("repo", schema::FILE).property("path", path))
                .await
                .unwrap();
        }
        for path in ["a.py", "./pkg/b.py", "c.py", "missing.py"] {
            ast(&store, "file_path", path).await;
        }

        AstFileMapper::new(store.clone(), true)
            .map_scope("repo", &CancellationToken::new(), |_, _| {})
            .await
            .unwrap();

        let part_of = store
            .find_relationships(&RelationshipFilter::of_type(schema::PART_OF))
            .await
            .unwrap();
        let defines = store
            .find_relationships(&RelationshipFilter::of_type(schema::DEFINES))
            .await
            .unwrap();
        assert_eq!(part_of.len(), 3);
        assert_eq!(defines.len(), part_of.len());
        for rel in &part_of {
            assert!(defines.iter().any(|d| d.from == rel.to && d.to == rel.from));
        }
    }

    #[tokio::test]
    async fn test_progress_reaches_total() {
        let store = Arc::new(MemoryGraphStore::new());
        store
            .create_node(NodeDraft::new("repo", schema::FILE).property("path", "a.py"))
            .await
            .unwrap();
        for _ in 0..3 {
            ast(&store, "path", "a.py").await;
        }

        let mut seen = Vec::new();
        AstFileMapper::new(store.clone(), true)
            .map_scope("repo", &CancellationToken::new(), |done, total| {
                seen.push((done, total))
            })
            .await
            .unwrap();
        assert_eq!(seen, vec![(1, 3), (2, 3), (3, 3)]);
    }
}
