use relopack_lib::platform::Platform;
use relopack_lib::platform::paths::{cache_dir, runtime_dir};
use relopack_lib::runtime::RuntimeInstall;

use crate::output::print_stat;

pub fn cmd_info() {
  println!("System:");
  match Platform::current() {
    Some(platform) => print_stat("Platform", &platform.triple()),
    _ => println!("Could not detect platform."),
  }
  print_stat("Cache", &cache_dir().display().to_string());

  match runtime_dir() {
    Some(dir) => match RuntimeInstall::discover(&dir) {
      Ok(runtime) => {
        print_stat("Runtime", &runtime.root.display().to_string());
        print_stat("Compiler", &runtime.compiler.display().to_string());
      }
      Err(e) => print_stat("Runtime", &format!("{} ({})", dir.display(), e)),
    },
    None => print_stat("Runtime", "not configured (set RELOPACK_RUNTIME_DIR)"),
  }
}
