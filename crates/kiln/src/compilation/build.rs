//! Concurrent module graph construction.
//!
//! Factory calls and module builds run as spawned tasks under a bounded
//! permit gate; everything else (the module table, reasons, diagnostics)
//! is mutated only by the driver loop that owns `&mut Compilation`. A task
//! hands its result back as a [`DriverEvent`]; handling an event may spawn
//! further tasks (recursion into dependencies) until the set drains.
//!
//! At most one build runs per module identity. A group that resolves to a
//! module already being built joins its waiter list and observes the same
//! terminal status.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, trace};

use super::{Compilation, PreparedChunk};
use crate::dependency::{self, Dependency};
use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::factory::FactoryContext;
use crate::module::{BuildState, Module, ModuleId};
use crate::store::AddModuleOutcome;
use crate::{Error, Result};

/// Bounded-concurrency permit gate shared by factory and build tasks.
///
/// Every factory call and every module build holds exactly one permit for
/// its full duration; dropping the permit on any exit path returns it.
#[derive(Debug, Clone)]
pub(crate) struct BuildGate {
    permits: Arc<Semaphore>,
}

impl BuildGate {
    pub(crate) fn new(parallelism: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(parallelism)),
        }
    }

    pub(crate) async fn acquire(&self) -> OwnedSemaphorePermit {
        Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .expect("build gate closed unexpectedly")
    }
}

/// One equal-resource dependency group headed for a factory.
struct GroupSpec {
    origin: Option<ModuleId>,
    dependencies: Vec<Arc<dyn Dependency>>,
    all_optional: bool,
    cache_group: Option<String>,
    recursive: bool,
    /// Index into `prepared_chunks` when this group is an entry.
    entry_slot: Option<usize>,
    context: Option<String>,
}

struct FactoryDone {
    spec: GroupSpec,
    outcome: std::result::Result<Option<Box<dyn Module>>, Diagnostic>,
    factory_time: Option<Duration>,
}

struct BuildDone {
    id: ModuleId,
    module: Box<dyn Module>,
    result: std::result::Result<(), Diagnostic>,
    optional: bool,
    dependencies: Vec<Arc<dyn Dependency>>,
    recursive: bool,
    build_time: Option<Duration>,
}

enum DriverEvent {
    Factory(FactoryDone),
    Build(BuildDone),
    /// A waiter observed the terminal status of a build it joined.
    Waiter,
}

impl Compilation {
    /// Register a named entry and build its whole module chain.
    ///
    /// A slot in `prepared_chunks` is reserved up front and removed again if
    /// the chain produced no module. Factory failures become
    /// `EntryModuleNotFound`; with `bail` they abort the call.
    pub async fn add_entry(
        &mut self,
        context: Option<String>,
        dependency: Arc<dyn Dependency>,
        name: &str,
    ) -> Result<()> {
        debug!(name, "adding entry");
        let slot = self.prepared_chunks.len();
        self.prepared_chunks.push(PreparedChunk {
            name: name.to_string(),
            module: None,
        });
        let mut tasks = JoinSet::new();
        let spec = GroupSpec {
            origin: None,
            all_optional: dependency.optional(),
            dependencies: vec![dependency],
            cache_group: None,
            recursive: true,
            entry_slot: Some(slot),
            context,
        };
        let result = match self.spawn_factory(spec, &mut tasks) {
            Ok(()) => self.run_graph_tasks(&mut tasks).await,
            Err(error) => Err(error),
        };
        if self
            .prepared_chunks
            .get(slot)
            .is_some_and(|prepared| prepared.module.is_none())
        {
            self.prepared_chunks.remove(slot);
        }
        result
    }

    /// Resolve and build everything the module's dependencies reach.
    ///
    /// Running this twice on an already-built module is a no-op: targets
    /// re-resolve to the same modules and reasons are not duplicated.
    pub async fn process_module_dependencies(&mut self, id: ModuleId) -> Result<()> {
        let mut tasks = JoinSet::new();
        self.process_module_dependencies_into(id, &mut tasks)?;
        self.run_graph_tasks(&mut tasks).await
    }

    /// Rebuild one module: build it again, resolve its new dependencies,
    /// then drop the reasons recorded by its previous dependency set.
    pub async fn rebuild_module(&mut self, id: ModuleId) -> Result<()> {
        debug!(module = %self.module(id).identifier(), "rebuilding module");
        let snapshot = self.module(id).module().block().clone();
        let mut tasks = JoinSet::new();
        self.spawn_build(id, false, Vec::new(), true, &mut tasks);
        let result = self.run_graph_tasks(&mut tasks).await;
        self.remove_reasons_of_block(id, &snapshot);
        result
    }

    /// A future resolving once the module's in-flight build finishes.
    ///
    /// When no build is tracked the future is immediately ready, including
    /// for modules that were never built at all; callers who need to tell
    /// those apart should consult
    /// [`ModuleNode::build_progress`](crate::module::ModuleNode::build_progress)
    /// first.
    pub fn wait_for_building_finished(
        &mut self,
        id: ModuleId,
    ) -> impl std::future::Future<Output = ()> + Send + 'static {
        let receiver = match &mut self.module_mut(id).state {
            BuildState::Building { waiters } => {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                Some(rx)
            }
            _ => None,
        };
        async move {
            if let Some(rx) = receiver {
                let _ = rx.await;
            }
        }
    }

    /// Drive spawned factory/build tasks to completion, mutating the graph
    /// as results arrive. The first fatal error stops all further handling;
    /// remaining tasks drain and their results are discarded (checked-out
    /// modules are still restored).
    async fn run_graph_tasks(&mut self, tasks: &mut JoinSet<DriverEvent>) -> Result<()> {
        let mut fatal: Option<Error> = None;
        while let Some(joined) = tasks.join_next().await {
            let event = match joined {
                Ok(event) => event,
                Err(join_error) => {
                    fatal.get_or_insert(Error::BuildPanic(join_error.to_string()));
                    continue;
                }
            };
            if fatal.is_some() {
                if let DriverEvent::Build(done) = event {
                    self.restore_checked_out_module(done);
                }
                continue;
            }
            let handled = match event {
                DriverEvent::Factory(done) => self.handle_factory_done(done, tasks),
                DriverEvent::Build(done) => self.handle_build_done(done, tasks),
                DriverEvent::Waiter => Ok(()),
            };
            if let Err(error) = handled {
                fatal = Some(error);
            }
        }
        match fatal {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn process_module_dependencies_into(
        &mut self,
        id: ModuleId,
        tasks: &mut JoinSet<DriverEvent>,
    ) -> Result<()> {
        let groups = self.sorted_dependency_groups(id);
        trace!(module = %self.module(id).identifier(), groups = groups.len(), "processing dependencies");
        self.add_module_dependencies(id, groups, tasks)
    }

    /// Bucket a module's transitive dependencies (own, blocks, variables) by
    /// equal resource, preserving first-seen order.
    fn sorted_dependency_groups(&self, id: ModuleId) -> Vec<Vec<Arc<dyn Dependency>>> {
        let mut groups: Vec<Vec<Arc<dyn Dependency>>> = Vec::new();
        self.module(id)
            .module()
            .block()
            .for_each_dependency(&mut |dep| {
                for group in groups.iter_mut() {
                    if dependency::is_equal_resource(group[0].as_ref(), dep.as_ref()) {
                        group.push(Arc::clone(dep));
                        return;
                    }
                }
                groups.push(vec![Arc::clone(dep)]);
            });
        groups
    }

    /// Fan the groups out to their factories, one task per group.
    fn add_module_dependencies(
        &mut self,
        origin: ModuleId,
        groups: Vec<Vec<Arc<dyn Dependency>>>,
        tasks: &mut JoinSet<DriverEvent>,
    ) -> Result<()> {
        let context = self.module(origin).module().context().map(str::to_string);
        for dependencies in groups {
            let all_optional = dependencies.iter().all(|d| d.optional());
            let spec = GroupSpec {
                origin: Some(origin),
                dependencies,
                all_optional,
                cache_group: None,
                recursive: true,
                entry_slot: None,
                context: context.clone(),
            };
            self.spawn_factory(spec, tasks)?;
        }
        Ok(())
    }

    /// Look up the factory (a miss is fatal, before anything is spawned) and
    /// run it under a permit.
    fn spawn_factory(&mut self, spec: GroupSpec, tasks: &mut JoinSet<DriverEvent>) -> Result<()> {
        let factory = self.factory_for(spec.dependencies[0].as_ref())?;
        let ctx = FactoryContext {
            issuer: spec
                .origin
                .map(|m| self.module(m).identifier().to_string()),
            compiler: self.name.clone(),
            context: spec.context.clone(),
            resolve_options: spec
                .origin
                .and_then(|m| self.module(m).module().resolve_options().cloned()),
            dependencies: spec.dependencies.clone(),
        };
        let gate = self.gate.clone();
        let profile = self.options.profile;
        tasks.spawn(async move {
            let _permit = gate.acquire().await;
            let started = profile.then(Instant::now);
            let outcome = factory.create(ctx).await;
            DriverEvent::Factory(FactoryDone {
                spec,
                outcome,
                factory_time: started.map(|s| s.elapsed()),
            })
        });
        Ok(())
    }

    fn handle_factory_done(
        &mut self,
        done: FactoryDone,
        tasks: &mut JoinSet<DriverEvent>,
    ) -> Result<()> {
        let FactoryDone {
            spec,
            outcome,
            factory_time,
        } = done;
        match outcome {
            Err(diagnostic) => self.report_factory_failure(&spec, diagnostic),
            Ok(None) => {
                trace!("factory produced no module; dependency group dropped");
                Ok(())
            }
            Ok(Some(module)) => self.connect_module(spec, module, factory_time, tasks),
        }
    }

    fn report_factory_failure(&mut self, spec: &GroupSpec, diagnostic: Diagnostic) -> Result<()> {
        let is_entry = spec.entry_slot.is_some();
        let mut diagnostic = diagnostic;
        diagnostic.kind = if is_entry {
            DiagnosticKind::EntryModuleNotFound
        } else {
            DiagnosticKind::ModuleNotFound
        };
        if diagnostic.details.is_none() {
            diagnostic.details = Some(group_requests(&spec.dependencies));
        }
        if diagnostic.loc.is_none() {
            diagnostic.loc = spec.dependencies[0].loc();
        }
        if let Some(origin) = spec.origin {
            let identifier = self.module(origin).identifier().to_string();
            diagnostic = diagnostic.with_module(origin, identifier);
        }
        if spec.all_optional && !is_entry {
            self.warnings.push(diagnostic);
            return Ok(());
        }
        self.errors.push(diagnostic.clone());
        if self.options.bail {
            Err(Error::Bail(diagnostic))
        } else {
            Ok(())
        }
    }

    fn connect_module(
        &mut self,
        spec: GroupSpec,
        module: Box<dyn Module>,
        factory_time: Option<Duration>,
        tasks: &mut JoinSet<DriverEvent>,
    ) -> Result<()> {
        let outcome = self.store.add_module(
            module,
            spec.cache_group.as_deref(),
            self.file_timestamps.as_ref(),
            self.context_timestamps.as_ref(),
        );
        match outcome {
            AddModuleOutcome::Duplicate(id) => {
                trace!(module = %self.module(id).identifier(), "duplicate identifier, joining existing module");
                self.attach_group(id, &spec);
                self.finish_entry(&spec, id);
                if let BuildState::Building { waiters } = &mut self.module_mut(id).state {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    tasks.spawn(async move {
                        let _ = rx.await;
                        DriverEvent::Waiter
                    });
                }
                Ok(())
            }
            AddModuleOutcome::CacheHit(id) => {
                debug!(module = %self.module(id).identifier(), "reusing cached module");
                self.module_mut(id).issuer = spec.origin;
                self.record_factory_time(id, factory_time);
                self.attach_group(id, &spec);
                let stored_errors = self.module(id).module().errors().to_vec();
                let stored_warnings = self.module(id).module().warnings().to_vec();
                self.errors.extend(stored_errors);
                self.warnings.extend(stored_warnings);
                self.finish_entry(&spec, id);
                if spec.recursive {
                    self.process_module_dependencies_into(id, tasks)?;
                }
                Ok(())
            }
            AddModuleOutcome::Inserted(id) => {
                self.module_mut(id).issuer = spec.origin;
                self.record_factory_time(id, factory_time);
                self.attach_group(id, &spec);
                self.finish_entry(&spec, id);
                self.spawn_build(
                    id,
                    spec.all_optional,
                    spec.dependencies,
                    spec.recursive,
                    tasks,
                );
                Ok(())
            }
        }
    }

    /// Point every dependency of the group at its module and record reasons.
    fn attach_group(&mut self, target: ModuleId, spec: &GroupSpec) {
        for dependency in &spec.dependencies {
            dependency.target().set(Some(target));
            self.module_mut(target)
                .add_reason(spec.origin, Arc::clone(dependency));
        }
    }

    fn finish_entry(&mut self, spec: &GroupSpec, id: ModuleId) {
        if let Some(slot) = spec.entry_slot {
            if let Some(prepared) = self.prepared_chunks.get_mut(slot) {
                prepared.module = Some(id);
            }
            if !self.entries.contains(&id) {
                self.entries.push(id);
            }
        }
    }

    fn record_factory_time(&mut self, id: ModuleId, factory_time: Option<Duration>) {
        if let Some(elapsed) = factory_time {
            self.module_mut(id)
                .profile
                .get_or_insert_with(Default::default)
                .factory = elapsed;
        }
    }

    /// Start (or join) the build of a module.
    fn spawn_build(
        &mut self,
        id: ModuleId,
        optional: bool,
        dependencies: Vec<Arc<dyn Dependency>>,
        recursive: bool,
        tasks: &mut JoinSet<DriverEvent>,
    ) {
        let plugins = Arc::clone(&self.plugins);
        plugins.each(|p| p.build_module(self, id));

        if let BuildState::Building { waiters } = &mut self.module_mut(id).state {
            let (tx, rx) = oneshot::channel();
            waiters.push(tx);
            tasks.spawn(async move {
                let _ = rx.await;
                DriverEvent::Waiter
            });
            return;
        }

        let node = self.module_mut(id);
        node.state = BuildState::Building {
            waiters: Vec::new(),
        };
        let mut module = node
            .module
            .take()
            .expect("module present when build starts");
        let ctx = self.build_context();
        let gate = self.gate.clone();
        let profile = self.options.profile;
        tasks.spawn(async move {
            let _permit = gate.acquire().await;
            let started = profile.then(Instant::now);
            let result = module.build(&ctx).await;
            DriverEvent::Build(BuildDone {
                id,
                module,
                result,
                optional,
                dependencies,
                recursive,
                build_time: started.map(|s| s.elapsed()),
            })
        });
    }

    fn handle_build_done(
        &mut self,
        done: BuildDone,
        tasks: &mut JoinSet<DriverEvent>,
    ) -> Result<()> {
        let BuildDone {
            id,
            module,
            result,
            optional,
            dependencies,
            recursive,
            build_time,
        } = done;
        let failed = result.is_err();

        // Restore the module and publish the terminal status before anything
        // re-entrant can observe this node.
        let waiters = {
            let node = self.module_mut(id);
            node.module = Some(module);
            node.built = true;
            if let Some(elapsed) = build_time {
                node.profile.get_or_insert_with(Default::default).building = elapsed;
            }
            match std::mem::replace(&mut node.state, BuildState::Done { failed }) {
                BuildState::Building { waiters } => waiters,
                _ => Vec::new(),
            }
        };
        for waiter in waiters {
            let _ = waiter.send(failed);
        }

        let identifier = self.module(id).identifier().to_string();
        let details = group_requests(&dependencies);
        let stored_errors = self.module(id).module().errors().to_vec();
        let stored_warnings = self.module(id).module().warnings().to_vec();
        for diagnostic in stored_errors {
            let stamped = self.stamp_build_diagnostic(
                diagnostic,
                DiagnosticKind::ModuleBuildError,
                id,
                &identifier,
                &details,
            );
            if optional {
                self.warnings.push(stamped);
            } else {
                self.errors.push(stamped);
            }
        }
        for diagnostic in stored_warnings {
            let stamped = self.stamp_build_diagnostic(
                diagnostic,
                DiagnosticKind::ModuleBuildWarning,
                id,
                &identifier,
                &details,
            );
            self.warnings.push(stamped);
        }

        // Publish dependencies in their total order.
        self.module_mut(id)
            .module_mut()
            .block_mut()
            .dependencies
            .sort_by(|a, b| dependency::compare(a.as_ref(), b.as_ref()));

        let plugins = Arc::clone(&self.plugins);
        match result {
            Err(diagnostic) => {
                plugins.each(|p| p.failed_module(self, id));
                let stamped = self.stamp_build_diagnostic(
                    diagnostic,
                    DiagnosticKind::ModuleBuildError,
                    id,
                    &identifier,
                    &details,
                );
                if optional {
                    self.warnings.push(stamped);
                    return Ok(());
                }
                self.errors.push(stamped.clone());
                if self.options.bail {
                    Err(Error::Bail(stamped))
                } else {
                    Ok(())
                }
            }
            Ok(()) => {
                plugins.each(|p| p.succeed_module(self, id));
                if recursive {
                    self.process_module_dependencies_into(id, tasks)?;
                }
                Ok(())
            }
        }
    }

    fn stamp_build_diagnostic(
        &self,
        mut diagnostic: Diagnostic,
        kind: DiagnosticKind,
        id: ModuleId,
        identifier: &str,
        details: &str,
    ) -> Diagnostic {
        diagnostic.kind = kind;
        if diagnostic.details.is_none() && !details.is_empty() {
            diagnostic.details = Some(details.to_string());
        }
        diagnostic.with_module(id, identifier)
    }

    fn restore_checked_out_module(&mut self, done: BuildDone) {
        let failed = done.result.is_err();
        let node = self.module_mut(done.id);
        node.module = Some(done.module);
        let state = std::mem::replace(&mut node.state, BuildState::Done { failed });
        if let BuildState::Building { waiters } = state {
            for waiter in waiters {
                let _ = waiter.send(failed);
            }
        }
    }
}

fn group_requests(dependencies: &[Arc<dyn Dependency>]) -> String {
    let mut requests: Vec<&str> = dependencies.iter().filter_map(|d| d.resource()).collect();
    requests.dedup();
    requests.join(", ")
}
