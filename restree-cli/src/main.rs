use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};

use restree::cli::{self, ARG_ROOT_DIR, ARG_VERBOSE};
use restree::{Dispatcher, Error, HttpTransport, Workspace};

fn main() {
    match real_main() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            // Usage errors (and --help inside a command) print through clap.
            if let Some(Error::Usage(usage)) = err.downcast_ref::<Error>() {
                usage.exit();
            }
            eprintln!("Error: {:#}", err);
            std::process::exit(1);
        }
    }
}

fn real_main() -> Result<i32> {
    // Global options only; stored commands are parsed level by level later.
    let matches = cli::root_shape().get_matches_from(std::env::args_os().skip(1));

    restree_cli::init_tracing(matches.get_flag(ARG_VERBOSE));
    let root = restree_cli::resolve_root(matches.get_one::<String>(ARG_ROOT_DIR).map(Path::new))?;
    let workspace = Workspace::open(&root)
        .with_context(|| format!("Failed to open configuration at {}", root.display()))?;

    let transport = HttpTransport::new(
        &restree_cli::user_agent(),
        workspace.defaults().body_memory_threshold,
    )?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let success = Dispatcher::new(&workspace, &transport).run_matches(&matches, &mut out)?;
    out.flush().context("Failed to flush output")?;
    Ok(if success { 0 } else { 1 })
}
