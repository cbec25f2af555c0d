//! Build orchestration.
//!
//! The [`Engine`] loads a definition, resolves the requested architectures and
//! runs one independent lifecycle per architecture. Each lifecycle runs on its
//! own blocking thread with its own Lua state and workspace; a semaphore bounds
//! how many run at once.
//!
//! - [`lifecycle`]: the phase state machine
//! - [`workspace`]: per-build `SRC_DIR`/`PKG_DIR`
//! - [`record`]: package records emitted on success

mod context;
pub mod lifecycle;
pub mod record;
mod types;
pub mod workspace;

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, info_span, warn};

pub use context::BuildContext;
pub use lifecycle::{BuildMode, Lifecycle, LifecycleState, Phase};
pub use record::{FileEntry, FileKind, PackageRecord, RecordError};
pub use types::*;
pub use workspace::Workspace;

use crate::arch::Arch;
use crate::consts::DEFAULT_VERSION;
use crate::definition::{DefinitionError, DefinitionSource, PackageDefinition};
use crate::error::ErrorKind;
use crate::fetch::{DownloadCache, Fetcher};
use crate::host::HostServices;
use crate::interrupt::{CancelToken, Interrupt, InterruptReason};
use crate::sandbox::{HookResult, LoadedDefinition, Sandbox, SandboxError};

/// One (definition × arch) unit of work.
struct Job {
  source: DefinitionSource,
  arch: Arch,
  mode: BuildMode,
  require_version: bool,
  cancel: CancelToken,
}

/// Runs build requests. Cheap to clone; clones share the worker pool.
#[derive(Clone)]
pub struct Engine {
  config: Arc<EngineConfig>,
  services: HostServices,
  permits: Arc<Semaphore>,
}

impl Engine {
  /// Must be called from within a Tokio runtime; host calls run on it.
  pub fn new(config: EngineConfig) -> Result<Self, BuildError> {
    let runtime = tokio::runtime::Handle::try_current().map_err(|_| BuildError::NoRuntime)?;
    let cache = config.cache_dir.as_ref().map(DownloadCache::new);
    let fetcher = Fetcher::new(config.fetch.clone(), cache)?;
    let services = HostServices {
      runtime,
      fetcher: Arc::new(fetcher),
      exec: config.exec.clone(),
      link_policy: config.link_policy,
    };
    let permits = Arc::new(Semaphore::new(config.parallelism.max(1)));
    Ok(Self {
      config: Arc::new(config),
      services,
      permits,
    })
  }

  pub fn config(&self) -> &EngineConfig {
    &self.config
  }

  /// Loads a definition and returns its validated metadata. No hook runs.
  ///
  /// The definition's top-level code is bounded by the phase timeout.
  pub async fn inspect(&self, source: DefinitionSource) -> Result<PackageDefinition, BuildError> {
    self.inspect_until(source, CancelToken::new()).await
  }

  async fn inspect_until(&self, source: DefinitionSource, cancel: CancelToken) -> Result<PackageDefinition, BuildError> {
    let interrupt = Interrupt::new();
    let forward = forward_cancel(&cancel, &interrupt);
    let engine = self.clone();
    let loaded = tokio::task::spawn_blocking(move || {
      engine
        .load_definition(&source, &interrupt)
        .map(|loaded| loaded.definition().clone())
    })
    .await;
    forward.abort();
    Ok(loaded.map_err(|e| BuildError::Join(e.to_string()))??)
  }

  /// Runs the definition's top-level chunk under the phase timeout.
  fn load_definition(&self, source: &DefinitionSource, interrupt: &Interrupt) -> Result<LoadedDefinition, SandboxError> {
    let sandbox = Sandbox::new(self.config.sandbox.clone(), self.services.clone(), interrupt.clone());
    let timer = self.start_timer(interrupt);
    let loaded = sandbox.load(source);
    let fired = timer.is_some_and(PhaseTimer::disarm);
    let loaded = loaded?;
    if fired {
      return Err(SandboxError::Timeout);
    }
    Ok(loaded)
  }

  fn start_timer(&self, interrupt: &Interrupt) -> Option<PhaseTimer> {
    self
      .config
      .phase_timeout
      .map(|budget| PhaseTimer::start(&self.services.runtime, budget, interrupt))
  }

  /// Builds one definition for the requested architectures.
  ///
  /// Definition problems and per-arch failures are reported as
  /// [`BuildOutcome::Failed`]; `Err` is reserved for engine faults.
  pub async fn build(&self, request: BuildRequest) -> Result<BuildReport, BuildError> {
    let definition = match self.inspect_until(request.source.clone(), request.cancel.clone()).await {
      Ok(definition) => definition,
      Err(BuildError::Sandbox(err)) => {
        error!(origin = %request.source.origin(), error = %err, "failed to load definition");
        return Ok(single_failure(BuildFailure {
          package: request.source.origin().to_string(),
          arch: None,
          phase: None,
          kind: err.kind(),
          message: err.to_string(),
          workspace: None,
        }));
      }
      Err(err) => return Err(err),
    };

    let arches = match select_arches(&definition, request.arch) {
      Ok(arches) => arches,
      Err((arch, err)) => {
        error!(package = %definition.name, error = %err, "architecture rejected");
        return Ok(single_failure(BuildFailure {
          package: definition.name.clone(),
          arch,
          phase: None,
          kind: ErrorKind::Definition,
          message: err.to_string(),
          workspace: None,
        }));
      }
    };
    info!(package = %definition.name, arches = ?arches, mode = ?request.mode, "starting build");

    let mut join_set = JoinSet::new();
    for arch in arches {
      let engine = self.clone();
      let job = Job {
        source: request.source.clone(),
        arch,
        mode: request.mode,
        require_version: request.require_version,
        cancel: request.cancel.clone(),
      };
      join_set.spawn(async move { engine.run_job(job).await });
    }

    let mut outcomes = Vec::new();
    while let Some(joined) = join_set.join_next().await {
      outcomes.push(joined.map_err(|e| BuildError::Join(e.to_string()))??);
    }
    outcomes.sort_by_key(BuildOutcome::arch);
    Ok(BuildReport { outcomes })
  }

  /// Builds several definitions concurrently. Reports come back in request order.
  pub async fn build_many(&self, requests: Vec<BuildRequest>) -> Result<Vec<BuildReport>, BuildError> {
    let mut join_set = JoinSet::new();
    for (index, request) in requests.into_iter().enumerate() {
      let engine = self.clone();
      join_set.spawn(async move { (index, engine.build(request).await) });
    }

    let mut reports = Vec::new();
    while let Some(joined) = join_set.join_next().await {
      let (index, report) = joined.map_err(|e| BuildError::Join(e.to_string()))?;
      reports.push((index, report?));
    }
    reports.sort_by_key(|(index, _)| *index);
    Ok(reports.into_iter().map(|(_, report)| report).collect())
  }

  async fn run_job(&self, job: Job) -> Result<BuildOutcome, BuildError> {
    let permit = self
      .permits
      .clone()
      .acquire_owned()
      .await
      .map_err(|e| BuildError::Join(e.to_string()))?;

    let interrupt = Interrupt::new();
    let forward = forward_cancel(&job.cancel, &interrupt);

    let engine = self.clone();
    let outcome = tokio::task::spawn_blocking(move || {
      let _permit = permit;
      engine.run_lifecycle(&job, &interrupt)
    })
    .await;
    forward.abort();
    outcome.map_err(|e| BuildError::Join(e.to_string()))
  }

  fn run_lifecycle(&self, job: &Job, interrupt: &Interrupt) -> BuildOutcome {
    let span = info_span!("build", package = tracing::field::Empty, arch = %job.arch);
    let _enter = span.enter();

    let loaded = match self.load_definition(&job.source, interrupt) {
      Ok(loaded) => loaded,
      Err(err) => {
        return BuildOutcome::Failed(BuildFailure {
          package: job.source.origin().to_string(),
          arch: Some(job.arch),
          phase: None,
          kind: err.kind(),
          message: err.to_string(),
          workspace: None,
        });
      }
    };
    let definition = loaded.definition();
    span.record("package", definition.name.as_str());

    let workspace = match Workspace::create(&self.config.work_root, &definition.name, job.arch) {
      Ok(workspace) => workspace,
      Err(err) => {
        return BuildOutcome::Failed(BuildFailure {
          package: definition.name.clone(),
          arch: Some(job.arch),
          phase: None,
          kind: ErrorKind::Io,
          message: format!("failed to create workspace under {}: {err}", self.config.work_root.display()),
          workspace: None,
        });
      }
    };

    let mut ctx = workspace.context(job.arch);
    if let Some(version) = &definition.version {
      ctx.set_version(version.clone());
    }

    let mut lifecycle = Lifecycle::new(job.mode);
    while let Some(phase) = lifecycle.current() {
      if let Err(err) = self.run_phase(&loaded, phase, &mut ctx, interrupt) {
        lifecycle.fail(err.kind());
        return self.fail(&workspace, definition, job.arch, phase, err.kind(), err.to_string());
      }
      if phase == Phase::Version && job.require_version && ctx.version().is_none() {
        let err = DefinitionError::VersionRequired(definition.name.clone());
        lifecycle.fail(ErrorKind::Definition);
        return self.fail(&workspace, definition, job.arch, phase, ErrorKind::Definition, err.to_string());
      }
      lifecycle.advance();
    }

    match lifecycle.state() {
      LifecycleState::Versioned => {
        if !self.config.keep_sources {
          workspace.remove();
        }
        info!(version = ?ctx.version(), "version resolved");
        BuildOutcome::Versioned(VersionReport {
          name: definition.name.clone(),
          arch: job.arch,
          version: ctx.version().map(str::to_string),
        })
      }
      LifecycleState::Packaged => self.finish_package(&workspace, definition, &ctx),
      state => self.fail(
        &workspace,
        definition,
        job.arch,
        Phase::Package,
        ErrorKind::Runtime,
        format!("lifecycle stopped in unexpected state {state:?}"),
      ),
    }
  }

  fn run_phase(
    &self,
    loaded: &LoadedDefinition,
    phase: Phase,
    ctx: &mut BuildContext,
    interrupt: &Interrupt,
  ) -> Result<(), SandboxError> {
    if let Some(reason) = interrupt.reason() {
      return Err(reason.into());
    }
    if !loaded.hooks().contains(phase) {
      debug!(phase = %phase, "no hook, skipping");
      return Ok(());
    }

    debug!(phase = %phase, "running hook");
    let started = Instant::now();
    let timer = self.start_timer(interrupt);
    let result = loaded.invoke(phase, ctx);
    let fired = timer.is_some_and(PhaseTimer::disarm);
    let result = result?;
    if fired {
      return Err(SandboxError::Timeout);
    }

    if let HookResult::Version(version) = result {
      info!(version = %version, "resolved version");
      ctx.set_version(version);
    }
    debug!(phase = %phase, elapsed_ms = started.elapsed().as_millis() as u64, "phase complete");
    Ok(())
  }

  fn finish_package(&self, workspace: &Workspace, definition: &PackageDefinition, ctx: &BuildContext) -> BuildOutcome {
    let arch = ctx.arch();
    match workspace.is_package_empty() {
      Ok(false) => {}
      Ok(true) => {
        return self.fail(
          workspace,
          definition,
          arch,
          Phase::Package,
          ErrorKind::EmptyPackage,
          "PACKAGE left PKG_DIR empty".to_string(),
        );
      }
      Err(err) => {
        return self.fail(workspace, definition, arch, Phase::Package, ErrorKind::Io, err.to_string());
      }
    }

    let version = ctx.version().unwrap_or(DEFAULT_VERSION);
    let record = match PackageRecord::collect(definition, version, arch, workspace.pkg_dir()) {
      Ok(record) => record,
      Err(err) => return self.fail(workspace, definition, arch, Phase::Package, ErrorKind::Io, err.to_string()),
    };
    if !self.config.keep_sources {
      workspace.remove_sources();
    }
    info!(version = %record.version, files = record.files.len(), "packaged");
    BuildOutcome::Packaged(record)
  }

  fn fail(
    &self,
    workspace: &Workspace,
    definition: &PackageDefinition,
    arch: Arch,
    phase: Phase,
    kind: ErrorKind,
    message: String,
  ) -> BuildOutcome {
    let preserved = if self.config.preserve_failed {
      warn!(path = %workspace.root().display(), "keeping failed workspace");
      Some(workspace.root().to_path_buf())
    } else {
      workspace.remove();
      None
    };
    error!(phase = %phase, kind = %kind, "build failed: {message}");
    BuildOutcome::Failed(BuildFailure {
      package: definition.name.clone(),
      arch: Some(arch),
      phase: Some(phase),
      kind,
      message,
      workspace: preserved,
    })
  }
}

/// Copies a caller's cancellation into a build interrupt, including one
/// that is already tripped.
fn forward_cancel(cancel: &CancelToken, interrupt: &Interrupt) -> JoinHandle<()> {
  if let Some(reason) = cancel.reason() {
    interrupt.trip(reason);
  }
  let (cancel, interrupt) = (cancel.clone(), interrupt.clone());
  tokio::spawn(async move {
    let reason = cancel.tripped().await;
    interrupt.trip(reason);
  })
}

const ARMED: u8 = 0;
const FIRED: u8 = 1;
const DISARMED: u8 = 2;

/// Deadline for one phase or for the top-level chunk. A timer that fires
/// after the guarded code returned is still reported by [`PhaseTimer::disarm`].
struct PhaseTimer {
  state: Arc<AtomicU8>,
  task: JoinHandle<()>,
}

impl PhaseTimer {
  fn start(runtime: &Handle, budget: Duration, interrupt: &Interrupt) -> Self {
    let state = Arc::new(AtomicU8::new(ARMED));
    let task = {
      let (state, interrupt) = (state.clone(), interrupt.clone());
      runtime.spawn(async move {
        tokio::time::sleep(budget).await;
        if state.compare_exchange(ARMED, FIRED, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
          interrupt.trip(InterruptReason::TimedOut);
        }
      })
    };
    Self { state, task }
  }

  /// Stops the timer. Returns `true` if it fired first.
  fn disarm(self) -> bool {
    self.task.abort();
    self
      .state
      .compare_exchange(ARMED, DISARMED, Ordering::SeqCst, Ordering::SeqCst)
      .is_err()
  }
}

fn single_failure(failure: BuildFailure) -> BuildReport {
  BuildReport {
    outcomes: vec![BuildOutcome::Failed(failure)],
  }
}

/// Resolves the selection against the declared set. Undeclared requests are
/// rejected here, before any workspace exists.
fn select_arches(
  definition: &PackageDefinition,
  selection: ArchSelection,
) -> Result<Vec<Arch>, (Option<Arch>, DefinitionError)> {
  let requested = match selection {
    ArchSelection::All => return Ok(definition.arch.clone()),
    ArchSelection::Arch(arch) => arch,
    ArchSelection::Host => match Arch::current() {
      Some(arch) => arch,
      None => {
        return Err((None, DefinitionError::UnsupportedHost(std::env::consts::ARCH.to_string())));
      }
    },
  };

  if !definition.supports(requested) {
    let declared = definition
      .arch
      .iter()
      .map(Arch::as_str)
      .collect::<Vec<_>>()
      .join(", ");
    return Err((
      Some(requested),
      DefinitionError::ArchNotDeclared {
        package: definition.name.clone(),
        requested,
        declared,
      },
    ));
  }
  Ok(vec![requested])
}
