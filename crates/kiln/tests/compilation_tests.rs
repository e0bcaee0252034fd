//! End-to-end compilation scenarios: graph construction, chunk
//! partitioning, ids, hashes and assets, driven through the stub
//! collaborators.

mod helpers;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use helpers::{compilation, compilation_with};
use kiln::fixtures::module;
use kiln::{
    Compilation, CompilationPlugin, DiagnosticKind, Error, MemoryCache, TimestampMap,
};

#[tokio::test]
async fn single_module_entry() {
    let mut t = compilation();
    t.entry("src/index.js", "main").await.unwrap();
    t.run().await.unwrap();

    assert_eq!(t.compilation.modules().len(), 1);
    let chunk = t.chunk_named("main");
    let module_id = t.module_id("src/index.js");
    assert_eq!(t.compilation.chunk(chunk).entry_module, Some(module_id));
    assert_eq!(t.compilation.module(module_id).module_id, Some(0));
    assert_eq!(t.compilation.chunk(chunk).chunk_id, Some(0));
    assert_eq!(t.compilation.chunk(chunk).files, vec!["main.js".to_string()]);
    let asset = t.compilation.assets.get("main.js").expect("rendered asset");
    assert_eq!(asset.source(), "// src/index.js\n");
    t.compilation.check_constraints().unwrap();
}

#[tokio::test]
async fn linear_chain_orderings() {
    let mut t = compilation();
    t.register([
        module("src/a.js").dep("src/b.js"),
        module("src/b.js").dep("src/c.js"),
    ]);
    t.entry("src/a.js", "main").await.unwrap();
    t.run().await.unwrap();

    assert_eq!(t.compilation.modules().len(), 3);
    let (a, b, c) = (
        t.module_id("src/a.js"),
        t.module_id("src/b.js"),
        t.module_id("src/c.js"),
    );
    assert_eq!(t.compilation.module(a).index, Some(0));
    assert_eq!(t.compilation.module(b).index, Some(1));
    assert_eq!(t.compilation.module(c).index, Some(2));
    assert_eq!(t.compilation.module(c).index2, Some(0));
    assert_eq!(t.compilation.module(b).index2, Some(1));
    assert_eq!(t.compilation.module(a).index2, Some(2));
    assert_eq!(t.compilation.module(a).depth, Some(0));
    assert_eq!(t.compilation.module(b).depth, Some(1));
    assert_eq!(t.compilation.module(c).depth, Some(2));

    assert_eq!(t.compilation.chunks.len(), 1);
    let chunk = t.chunk_named("main");
    assert_eq!(
        t.chunk_members(chunk),
        ["src/a.js", "src/b.js", "src/c.js"]
    );
}

#[tokio::test]
async fn diamond_joins_on_one_instance() {
    let mut t = compilation();
    t.register([
        module("src/a.js").dep("src/b.js").dep("src/c.js"),
        module("src/b.js").dep("src/d.js"),
        module("src/c.js").dep("src/d.js"),
    ]);
    t.entry("src/a.js", "main").await.unwrap();
    t.run().await.unwrap();

    assert_eq!(t.compilation.modules().len(), 4);
    let d = t.module_id("src/d.js");
    assert_eq!(t.compilation.module(d).depth, Some(2));
    let reasons = t.compilation.module(d).reasons();
    assert_eq!(reasons.len(), 2);
    let (b, c) = (t.module_id("src/b.js"), t.module_id("src/c.js"));
    let origins: Vec<_> = reasons.iter().filter_map(|r| r.origin).collect();
    assert!(origins.contains(&b) && origins.contains(&c));
    assert_eq!(t.compilation.chunks.len(), 1);
}

#[tokio::test]
async fn async_split_creates_a_child_chunk() {
    let mut t = compilation();
    t.register([
        module("src/a.js").dep("src/b.js").split("x", &["src/c.js"]),
        module("src/c.js").dep("src/d.js"),
    ]);
    t.entry("src/a.js", "main").await.unwrap();
    t.run().await.unwrap();

    assert_eq!(t.compilation.chunks.len(), 2);
    let main = t.chunk_named("main");
    let x = t.chunk_named("x");
    assert_eq!(t.chunk_members(main), ["src/a.js", "src/b.js"]);
    assert_eq!(t.chunk_members(x), ["src/c.js", "src/d.js"]);
    assert_eq!(t.compilation.chunk(x).parents().to_vec(), vec![main]);
    assert!(!t.chunk_has(x, "src/b.js"));
    assert!(!t.chunk_has(main, "src/c.js"));
    assert!(t.compilation.chunk(main).has_runtime());
    assert!(!t.compilation.chunk(x).has_runtime());
    assert!(t.compilation.assets.contains_key("main.js"));
    assert!(t.compilation.assets.contains_key("1.js"));
    t.compilation.check_constraints().unwrap();
}

#[tokio::test]
async fn shared_modules_are_pruned_from_async_chunks() {
    let mut t = compilation();
    t.register([module("src/a.js")
        .dep("src/b.js")
        .split("x", &["src/b.js", "src/e.js"])]);
    t.entry("src/a.js", "main").await.unwrap();
    t.run().await.unwrap();

    let x = t.chunk_named("x");
    assert_eq!(t.chunk_members(x), ["src/e.js"]);
    let b = t.module_id("src/b.js");
    let main = t.chunk_named("main");
    assert_eq!(t.compilation.module(b).chunks().to_vec(), vec![main]);
}

#[tokio::test]
async fn optional_factory_failure_is_a_warning() {
    let mut t = compilation();
    t.register([module("src/a.js").optional_dep("./missing")]);
    t.factory.fail("./missing", "cannot resolve './missing'");
    t.entry("src/a.js", "main").await.unwrap();
    t.run().await.unwrap();

    assert!(t.compilation.errors.is_empty());
    assert_eq!(t.compilation.warnings.len(), 1);
    assert_eq!(
        t.compilation.warnings[0].kind,
        DiagnosticKind::ModuleNotFound
    );
    assert!(t.compilation.get_module("src/a.js").is_some());
    assert_eq!(t.compilation.chunks.len(), 1);
}

#[tokio::test]
async fn fatal_failure_with_bail_leaves_assets_untouched() {
    let mut t = compilation_with(|params| params.options.bail = true);
    t.register([module("src/a.js").dep("./missing")]);
    t.factory.fail("./missing", "cannot resolve './missing'");

    let entry_result = t.entry("src/a.js", "main").await;
    assert!(matches!(entry_result, Err(Error::Bail(_))));

    t.compilation.finish();
    let seal_result = t.compilation.seal().await;
    assert!(matches!(seal_result, Err(Error::Bail(_))));
    assert!(t.compilation.assets.is_empty());
}

#[tokio::test]
async fn entry_factory_failure_is_entry_module_not_found() {
    let mut t = compilation();
    t.factory.fail("src/a.js", "no such entry");
    t.entry("src/a.js", "main").await.unwrap();

    assert_eq!(t.compilation.errors.len(), 1);
    assert_eq!(
        t.compilation.errors[0].kind,
        DiagnosticKind::EntryModuleNotFound
    );
    // The reserved slot was withdrawn; sealing produces no chunk.
    assert!(t.compilation.prepared_chunks.is_empty());
    t.run().await.unwrap();
    assert!(t.compilation.chunks.is_empty());
}

#[tokio::test]
async fn weak_dependencies_build_but_do_not_join_chunks() {
    let mut t = compilation();
    t.register([module("src/a.js").weak_dep("src/w.js")]);
    t.entry("src/a.js", "main").await.unwrap();
    t.run().await.unwrap();

    let w = t.module_id("src/w.js");
    assert_eq!(t.compilation.module(w).reasons().len(), 1);
    assert!(t.compilation.module(w).chunks().is_empty());
    let main = t.chunk_named("main");
    assert!(!t.chunk_has(main, "src/w.js"));
}

#[tokio::test]
async fn dropped_factory_results_are_silent() {
    let mut t = compilation();
    t.register([module("src/a.js").dep("./ignored")]);
    t.factory.drop_request("./ignored");
    t.entry("src/a.js", "main").await.unwrap();
    t.run().await.unwrap();

    assert_eq!(t.compilation.modules().len(), 1);
    assert!(t.compilation.errors.is_empty());
    assert!(t.compilation.warnings.is_empty());
}

#[tokio::test]
async fn async_split_naming_an_entry_chunk_folds_and_warns() {
    let mut t = compilation();
    t.register([module("src/a.js").split("main", &["src/c.js"])]);
    t.entry("src/a.js", "main").await.unwrap();
    t.run().await.unwrap();

    assert_eq!(t.compilation.chunks.len(), 1);
    assert_eq!(t.compilation.warnings.len(), 1);
    assert_eq!(
        t.compilation.warnings[0].kind,
        DiagnosticKind::AsyncDependencyToInitialChunk
    );
    let main = t.chunk_named("main");
    assert!(t.chunk_has(main, "src/c.js"));
}

#[tokio::test]
async fn fully_available_split_chunks_are_removed() {
    let mut t = compilation();
    t.register([module("src/a.js").dep("src/b.js").split("x", &["src/b.js"])]);
    t.entry("src/a.js", "main").await.unwrap();
    t.run().await.unwrap();

    assert_eq!(t.compilation.chunks.len(), 1);
    assert!(!t.compilation.named_chunks.contains_key("x"));
    let b = t.module_id("src/b.js");
    let main = t.chunk_named("main");
    assert_eq!(t.compilation.module(b).chunks().to_vec(), vec![main]);
    t.compilation.check_constraints().unwrap();
}

#[tokio::test]
async fn two_entries_share_module_instances() {
    let mut t = compilation();
    t.register([
        module("src/a.js").dep("src/shared.js"),
        module("src/b.js").dep("src/shared.js"),
    ]);
    t.entry("src/a.js", "one").await.unwrap();
    t.entry("src/b.js", "two").await.unwrap();
    t.run().await.unwrap();

    assert_eq!(t.compilation.modules().len(), 3);
    let shared = t.module_id("src/shared.js");
    assert_eq!(t.compilation.module(shared).reasons().len(), 2);
    assert!(t.chunk_has(t.chunk_named("one"), "src/shared.js"));
    assert!(t.chunk_has(t.chunk_named("two"), "src/shared.js"));
    assert_eq!(t.compilation.entrypoints.len(), 2);
}

#[tokio::test]
async fn build_diagnostics_are_stamped_and_recorded() {
    let mut t = compilation();
    t.register([
        module("src/a.js").dep("src/bad.js"),
        module("src/bad.js").error("unexpected token").warning("legacy syntax"),
    ]);
    t.entry("src/a.js", "main").await.unwrap();
    t.run().await.unwrap();

    assert_eq!(t.compilation.errors.len(), 1);
    assert_eq!(t.compilation.errors[0].kind, DiagnosticKind::ModuleBuildError);
    assert_eq!(
        t.compilation.errors[0].module_identifier.as_deref(),
        Some("src/bad.js")
    );
    assert_eq!(t.compilation.warnings.len(), 1);
    assert_eq!(
        t.compilation.warnings[0].kind,
        DiagnosticKind::ModuleBuildWarning
    );
}

#[tokio::test]
async fn failing_build_keeps_the_module_and_records_an_error() {
    let mut t = compilation();
    t.register([
        module("src/a.js").dep("src/boom.js"),
        module("src/boom.js").failing("loader crashed"),
    ]);
    t.entry("src/a.js", "main").await.unwrap();
    t.run().await.unwrap();

    assert!(t.compilation.get_module("src/boom.js").is_some());
    assert!(t
        .compilation
        .errors
        .iter()
        .any(|e| e.message.contains("loader crashed")));
}

#[tokio::test]
async fn reserved_ids_are_skipped_and_holes_reused() {
    let mut t = compilation();
    t.register([
        module("src/a.js").dep("src/b.js"),
        module("src/b.js").dep("src/c.js"),
    ]);
    t.entry("src/a.js", "main").await.unwrap();
    t.compilation.used_module_ids.insert(0);
    t.compilation.used_module_ids.insert(2);
    t.run().await.unwrap();

    let ids: Vec<_> = [
        t.module_id("src/a.js"),
        t.module_id("src/b.js"),
        t.module_id("src/c.js"),
    ]
    .into_iter()
    .map(|m| t.compilation.module(m).module_id.unwrap())
    .collect();
    assert_eq!(ids, [1, 3, 4]);
    t.compilation.check_constraints().unwrap();
}

#[tokio::test]
async fn hashes_are_deterministic_across_runs() {
    async fn build() -> Compilation {
        let mut t = compilation();
        t.register([
            module("src/a.js")
                .dep("src/b.js")
                .split("x", &["src/c.js"])
                .dep_at("src/z.js", 9),
        ]);
        t.entry("src/a.js", "main").await.unwrap();
        t.run().await.unwrap();
        t.compilation
    }

    let first = build().await;
    let second = build().await;
    assert!(first.full_hash.is_some());
    assert_eq!(first.full_hash, second.full_hash);
    assert_eq!(first.hash, second.hash);
}

#[tokio::test]
async fn wide_fanout_is_deterministic_under_concurrency() {
    async fn build() -> Compilation {
        let mut t = compilation();
        let mut spec = module("src/a.js");
        for i in 0..24 {
            spec = spec.dep(&format!("src/m{i}.js"));
        }
        t.register([spec]);
        t.entry("src/a.js", "main").await.unwrap();
        t.run().await.unwrap();
        t.compilation
    }

    let first = build().await;
    let second = build().await;
    assert_eq!(first.full_hash, second.full_hash);
    let ids: Vec<_> = first
        .modules()
        .iter()
        .map(|&m| first.module(m).module_id)
        .collect();
    let other: Vec<_> = second
        .modules()
        .iter()
        .map(|&m| second.module(m).module_id)
        .collect();
    assert_eq!(ids, other);
}

#[tokio::test]
async fn seal_unseal_seal_reproduces_the_hash() {
    let mut t = compilation();
    t.register([module("src/a.js").dep("src/b.js").split("x", &["src/c.js"])]);
    t.entry("src/a.js", "main").await.unwrap();
    t.run().await.unwrap();

    let first_hash = t.compilation.full_hash.clone();
    let first_assets: Vec<_> = t.compilation.assets.keys().cloned().collect();

    t.compilation.unseal();
    assert!(t.compilation.assets.is_empty());
    assert!(t.compilation.chunks.is_empty());

    t.compilation.seal().await.unwrap();
    assert_eq!(t.compilation.full_hash, first_hash);
    let second_assets: Vec<_> = t.compilation.assets.keys().cloned().collect();
    assert_eq!(first_assets, second_assets);
}

#[tokio::test]
async fn process_module_dependencies_twice_is_a_no_op() {
    let mut t = compilation();
    t.register([module("src/a.js").dep("src/b.js")]);
    t.entry("src/a.js", "main").await.unwrap();

    let a = t.module_id("src/a.js");
    let b = t.module_id("src/b.js");
    assert_eq!(t.compilation.module(b).reasons().len(), 1);

    t.compilation.process_module_dependencies(a).await.unwrap();
    assert_eq!(t.compilation.modules().len(), 2);
    assert_eq!(t.compilation.module(b).reasons().len(), 1);
}

#[tokio::test]
async fn rebuilding_a_module_preserves_chunk_membership() {
    let mut t = compilation();
    t.register([module("src/a.js").dep("src/b.js")]);
    t.entry("src/a.js", "main").await.unwrap();
    t.run().await.unwrap();

    let a = t.module_id("src/a.js");
    t.compilation.rebuild_module(a).await.unwrap();

    let b = t.module_id("src/b.js");
    let main = t.chunk_named("main");
    assert!(t.chunk_has(main, "src/b.js"));
    assert_eq!(t.compilation.module(b).reasons().len(), 1);
}

#[tokio::test]
async fn cached_modules_skip_rebuilds_and_replay_diagnostics() {
    let cache: Arc<dyn kiln::ModuleCache> = Arc::new(MemoryCache::new());

    let mut first = compilation_with(|params| {
        params.cache = Some(cache.clone());
        params.file_timestamps = Some(TimestampMap::default());
        params.context_timestamps = Some(TimestampMap::default());
    });
    first.register([
        module("src/a.js").cacheable().dep("src/b.js"),
        module("src/b.js").cacheable().warning("deprecated api"),
    ]);
    first.entry("src/a.js", "main").await.unwrap();
    first.run().await.unwrap();
    assert_eq!(first.compilation.warnings.len(), 1);
    first.compilation.store_cached_modules();

    let mut second = compilation_with(|params| {
        params.cache = Some(cache.clone());
        params.file_timestamps = Some(TimestampMap::default());
        params.context_timestamps = Some(TimestampMap::default());
    });
    second.register([
        module("src/a.js").cacheable().dep("src/b.js"),
        module("src/b.js").cacheable().warning("deprecated api"),
    ]);
    second.entry("src/a.js", "main").await.unwrap();
    second.run().await.unwrap();

    // Same graph, no rebuilds: the cached instances were reused as-is.
    assert_eq!(second.compilation.modules().len(), 2);
    for &id in second.compilation.modules() {
        let node = second.compilation.module(id);
        let stub = node
            .module()
            .as_any()
            .downcast_ref::<kiln::fixtures::StubModule>()
            .unwrap();
        assert_eq!(stub.build_count, 1, "{} was rebuilt", node.identifier());
        assert!(!node.built);
    }
    // The stored warning was replayed into this compilation.
    assert_eq!(second.compilation.warnings.len(), 1);
    assert_eq!(second.compilation.full_hash, first.compilation.full_hash);
}

#[tokio::test]
async fn module_assets_are_installed() {
    let mut t = compilation();
    t.register([module("src/a.js").asset("manifest.txt", "hello")]);
    t.entry("src/a.js", "main").await.unwrap();
    t.run().await.unwrap();

    let asset = t.compilation.assets.get("manifest.txt").expect("module asset");
    assert_eq!(asset.source(), "hello");
}

#[tokio::test]
async fn conflicting_chunk_filenames_fail_the_chunk() {
    let mut t = compilation_with(|params| {
        params.options.output.filename = "bundle.js".to_string();
    });
    t.register([module("src/a.js"), module("src/b.js")]);
    t.entry("src/a.js", "one").await.unwrap();
    t.entry("src/b.js", "two").await.unwrap();
    t.run().await.unwrap();

    assert_eq!(t.compilation.assets.len(), 1);
    assert_eq!(t.compilation.errors.len(), 1);
    assert_eq!(t.compilation.errors[0].kind, DiagnosticKind::AssetConflict);
}

#[tokio::test]
async fn profiling_records_factory_and_build_timings() {
    let mut t = compilation_with(|params| params.options.profile = true);
    t.entry("src/a.js", "main").await.unwrap();

    let a = t.module_id("src/a.js");
    let profile = t.compilation.module(a).profile.expect("profile recorded");
    let _ = profile.factory;
    let _ = profile.building;
}

struct ResealOnce {
    requested: AtomicBool,
    seals: AtomicUsize,
}

impl CompilationPlugin for ResealOnce {
    fn seal(&self, _compilation: &mut Compilation) {
        self.seals.fetch_add(1, Ordering::SeqCst);
    }

    fn need_additional_seal(&self, _compilation: &mut Compilation) -> Option<bool> {
        if self.requested.swap(true, Ordering::SeqCst) {
            None
        } else {
            Some(true)
        }
    }
}

#[tokio::test]
async fn need_additional_seal_reenters_the_lifecycle() {
    let plugin = Arc::new(ResealOnce {
        requested: AtomicBool::new(false),
        seals: AtomicUsize::new(0),
    });

    struct Forward(Arc<ResealOnce>);
    impl CompilationPlugin for Forward {
        fn seal(&self, compilation: &mut Compilation) {
            self.0.seal(compilation);
        }
        fn need_additional_seal(&self, compilation: &mut Compilation) -> Option<bool> {
            self.0.need_additional_seal(compilation)
        }
    }

    let mut t = compilation_with({
        let plugin = plugin.clone();
        move |params| params.plugins.add(Forward(plugin))
    });
    t.entry("src/a.js", "main").await.unwrap();
    t.run().await.unwrap();

    assert_eq!(plugin.seals.load(Ordering::SeqCst), 2);
    assert!(t.compilation.hash.is_some());
}

struct FailingAssetOptimizer;

#[async_trait::async_trait]
impl CompilationPlugin for FailingAssetOptimizer {
    async fn optimize_assets(&self, _compilation: &mut Compilation) -> kiln::Result<()> {
        Err(Error::plugin("asset optimizer rejected the build"))
    }
}

#[tokio::test]
async fn async_series_errors_fail_the_seal() {
    let mut t = compilation_with(|params| params.plugins.add(FailingAssetOptimizer));
    t.entry("src/a.js", "main").await.unwrap();
    t.compilation.finish();
    let result = t.compilation.seal().await;
    assert!(matches!(result, Err(Error::Plugin { .. })));
}

#[tokio::test]
async fn missing_factory_registration_is_fatal() {
    let mut params = kiln::CompilationParams::new(kiln::fixtures::plain_templates());
    params.name = Some("bare".to_string());
    let mut compilation = Compilation::new(params);
    let result = compilation
        .add_entry(
            None,
            Arc::new(kiln::fixtures::StubDependency::new("src/a.js")),
            "main",
        )
        .await;
    assert!(matches!(result, Err(Error::FactoryLookup { .. })));
}
