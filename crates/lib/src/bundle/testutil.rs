//! Fixtures shared by the bundle operation tests.

use std::cell::{Cell, RefCell};
use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use super::BuildContext;
use crate::compile::{CompileError, LauncherCompiler, LauncherSpec};
use crate::consts::{LOCK_FILE, PROJECT_FILE};
use crate::graph::LockfilePackageManager;
use crate::launcher::{LaunchError, PreInitConfig, Runtime, SnapshotLocator};
use crate::platform::{Arch, Os, Platform};
use crate::project::Project;
use crate::runtime::{BASE_IMAGE_FILE, RuntimeInstall};
use crate::snapshot::{SnapshotCache, SnapshotRequest, Toolchain, ToolchainFailure};
use crate::util::hash::{ContentHash, hash_bytes};

pub fn lib_name(stem: &str) -> String {
  Os::current().unwrap().dylib_file_name(stem)
}

pub struct FakeToolchain {
  image: RefCell<Vec<u8>>,
  failure: RefCell<Option<String>>,
  calls: Cell<usize>,
}

impl FakeToolchain {
  pub fn calls(&self) -> usize {
    self.calls.get()
  }

  pub fn fail_with(&self, diagnostic: &str) {
    *self.failure.borrow_mut() = Some(diagnostic.to_string());
  }

  pub fn write_image(&self, image: &[u8]) {
    *self.image.borrow_mut() = image.to_vec();
  }
}

impl Toolchain for FakeToolchain {
  fn base_image(&self) -> Option<ContentHash> {
    Some(hash_bytes(b"base"))
  }

  fn compile_snapshot(&self, _request: &SnapshotRequest, output: &Path) -> Result<(), ToolchainFailure> {
    self.calls.set(self.calls.get() + 1);
    if let Some(diagnostic) = self.failure.borrow().clone() {
      return Err(ToolchainFailure {
        diagnostic,
        code: Some(1),
      });
    }
    fs::write(output, &*self.image.borrow()).unwrap();
    Ok(())
  }
}

#[derive(Default)]
pub struct FakeCompiler {
  compiled: RefCell<Vec<LauncherSpec>>,
}

impl FakeCompiler {
  pub fn compiled(&self) -> Vec<LauncherSpec> {
    self.compiled.borrow().clone()
  }
}

impl LauncherCompiler for FakeCompiler {
  fn compile(&self, spec: &LauncherSpec, output: &Path) -> Result<(), CompileError> {
    fs::write(output, format!("launcher {} -> {}", spec.executable, spec.entry)).unwrap();
    self.compiled.borrow_mut().push(spec.clone());
    Ok(())
  }
}

/// Runtime that records what the launcher hands it.
#[derive(Default)]
pub struct RecordingRuntime {
  pub config: Option<PreInitConfig>,
}

impl Runtime for RecordingRuntime {
  fn parse_options(&mut self, args: Vec<String>) -> Result<Vec<String>, LaunchError> {
    Ok(args)
  }

  fn init(&mut self, config: &PreInitConfig) -> Result<(), LaunchError> {
    if !config.image_file.is_file() {
      return Err(LaunchError::Init(format!("no image at {}", config.image_file.display())));
    }
    self.config = Some(config.clone());
    Ok(())
  }

  fn run(&mut self, _entry: &str, _args: &[String]) -> Result<i32, LaunchError> {
    Ok(0)
  }

  fn shutdown(&mut self, _exit_code: i32) {}
}

/// Locator standing in for the loader: reports a fixed path if it exists.
pub struct DirLocator(pub PathBuf);

impl SnapshotLocator for DirLocator {
  fn locate(&mut self, library: &str, _probe_symbol: &str) -> Result<PathBuf, LaunchError> {
    if self.0.is_file() {
      Ok(self.0.clone())
    } else {
      Err(LaunchError::SnapshotNotFound {
        library: library.to_string(),
        reason: "not found".to_string(),
      })
    }
  }
}

/// A project, a runtime installation and an output directory in one temp tree.
pub struct Fixture {
  pub temp: TempDir,
  pub platform: Platform,
  pub toolchain: FakeToolchain,
  pub compiler: FakeCompiler,
  pub runtime: RuntimeInstall,
  pub cache: SnapshotCache,
  deps: RefCell<Vec<String>>,
  lock: RefCell<String>,
  extra_manifest: RefCell<String>,
}

impl Fixture {
  pub fn new() -> Self {
    let temp = TempDir::new().unwrap();
    let root = dunce::canonicalize(temp.path()).unwrap();
    let platform = Platform::current().unwrap();

    fs::create_dir_all(root.join("project/src")).unwrap();
    fs::write(root.join("project/src/hello.src"), "main() = println(\"hello\")\n").unwrap();
    fs::create_dir_all(root.join("out")).unwrap();

    let rt_lib = root.join("runtime/lib");
    fs::create_dir_all(&rt_lib).unwrap();
    fs::write(rt_lib.join(BASE_IMAGE_FILE), "base").unwrap();
    fs::write(rt_lib.join(lib_name("runtime")), "runtime").unwrap();

    let fixture = Self {
      runtime: RuntimeInstall {
        root: root.join("runtime"),
        base_image: rt_lib.join(BASE_IMAGE_FILE),
        lib_dir: rt_lib,
        compiler: root.join("runtime/bin/compile"),
      },
      cache: SnapshotCache::new(root.join("cache")),
      temp,
      platform,
      toolchain: FakeToolchain {
        image: RefCell::new(b"\x7fIMG\x00compiled".to_vec()),
        failure: RefCell::new(None),
        calls: Cell::new(0),
      },
      compiler: FakeCompiler::default(),
      deps: RefCell::new(Vec::new()),
      lock: RefCell::new(String::new()),
      extra_manifest: RefCell::new(String::new()),
    };
    fixture.write_project();
    fixture
  }

  pub fn root(&self) -> PathBuf {
    dunce::canonicalize(self.temp.path()).unwrap()
  }

  pub fn project_dir(&self) -> PathBuf {
    self.root().join("project")
  }

  pub fn out(&self, name: &str) -> PathBuf {
    self.root().join("out").join(name)
  }

  /// Entries left in the output parent.
  pub fn leftovers(&self) -> Vec<String> {
    fs::read_dir(self.root().join("out"))
      .unwrap()
      .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
      .collect()
  }

  /// Append raw TOML to the project manifest.
  pub fn manifest_extra(&self, toml: &str) {
    self.extra_manifest.borrow_mut().push_str(toml);
    self.write_project();
  }

  /// A direct dependency shipping one library for the host platform.
  pub fn add_artifact_dep(&self, package: &str, artifact: &str, file: &str) -> PathBuf {
    let path = self.root().join("deps").join(package).join(file);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, format!("library {}", artifact)).unwrap();
    self.add_package(package, artifact, self.platform, &path, &[]);
    path
  }

  /// A direct dependency whose artifact exists only for another platform.
  pub fn add_foreign_artifact_dep(&self, package: &str, artifact: &str) {
    let other = if self.platform.arch == Arch::Aarch64 {
      Platform::new(Arch::X86_64, self.platform.os)
    } else {
      Platform::new(Arch::Aarch64, self.platform.os)
    };
    let path = self.root().join("deps").join(package).join("lib.bin");
    self.add_package(package, artifact, other, &path, &[]);
  }

  /// A standard-library module required by the project.
  pub fn add_stdlib(&self, name: &str) {
    self.deps.borrow_mut().push(name.to_string());
    self
      .lock
      .borrow_mut()
      .push_str(&format!("[[packages]]\nname = \"{}\"\nstdlib = true\n\n", name));
    self.write_project();
  }

  fn add_package(&self, package: &str, artifact: &str, platform: Platform, path: &Path, requires: &[&str]) {
    self.deps.borrow_mut().push(package.to_string());
    let requires: Vec<String> = requires.iter().map(|r| format!("\"{}\"", r)).collect();
    self.lock.borrow_mut().push_str(&format!(
      "[[packages]]\nname = \"{}\"\nrequires = [{}]\n\n[[packages.artifacts]]\nname = \"{}\"\nentries = [{{ platform = \"{}\", path = '{}' }}]\n\n",
      package,
      requires.join(", "),
      artifact,
      platform,
      path.display()
    ));
    self.write_project();
  }

  fn write_project(&self) {
    let dir = self.project_dir();
    let deps: Vec<String> = self.deps.borrow().iter().map(|d| format!("\"{}\"", d)).collect();
    let manifest = format!(
      "name = \"hello\"\nentry_script = \"src/hello.src\"\ndependencies = [{}]\n{}",
      deps.join(", "),
      self.extra_manifest.borrow()
    );
    fs::write(dir.join(PROJECT_FILE), manifest).unwrap();
    fs::write(dir.join(LOCK_FILE), &*self.lock.borrow()).unwrap();
  }

  pub fn project(&self) -> Project {
    Project::load(&self.project_dir()).unwrap()
  }

  pub fn context(&self) -> BuildContext<'_> {
    BuildContext {
      package_manager: &LockfilePackageManager,
      toolchain: &self.toolchain,
      launcher_compiler: &self.compiler,
      runtime: Some(&self.runtime),
      cache: Some(&self.cache),
    }
  }
}
