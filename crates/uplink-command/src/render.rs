//! Launch plans rendered as human-readable previews and runnable scripts.

use std::fmt::Write;
use std::fs;
use std::path::Path;

use tracing::{info, instrument};

use uplink_ipc::{LaunchPlan, LinkTransport, PlanError, ProcessId, ProcessRole};

use crate::error::ExportError;

/// Output flavour of [`render_script`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptFormat {
    /// Command lines for reading, one pipeline per line.
    Plain,

    /// POSIX shell script.
    Posix,

    /// Windows batch file.
    Batch,
}

impl ScriptFormat {
    /// Conventional file extension.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Plain => "txt",
            Self::Posix => "sh",
            Self::Batch => "bat",
        }
    }

    fn quote(self, arg: &str) -> String {
        match self {
            Self::Plain => plain_quote(arg),
            Self::Posix => posix_quote(arg),
            Self::Batch => batch_quote(arg),
        }
    }
}

/// Render every process of a plan. Pipelines feeding the multiplexer run last,
/// in the foreground; everything else is started in the background first.
pub fn render_script(plan: &LaunchPlan, format: ScriptFormat) -> Result<String, PlanError> {
    let chains = pipelines(plan)?;
    let (foreground, background): (Vec<_>, Vec<_>) = chains.into_iter().partition(|chain| {
        chain.iter().any(|id| {
            plan.process(*id)
                .is_some_and(|spec| spec.role == ProcessRole::Multiplexer)
        })
    });

    let mut script = String::new();
    match format {
        ScriptFormat::Plain => {}
        ScriptFormat::Posix => {
            script.push_str("#!/bin/sh\n");
            script.push_str("trap 'kill 0' EXIT INT TERM\n");
        }
        ScriptFormat::Batch => script.push_str("@echo off\n"),
    }

    let comment = match format {
        ScriptFormat::Batch => "rem",
        _ => "#",
    };
    let _ = writeln!(
        script,
        "{comment} {} processes, multiplex rate {} bps",
        plan.processes.len(),
        plan.mux_rate_bps
    );
    for file in &plan.files {
        let _ = writeln!(script, "{comment} reads {}", file.path.display());
    }

    for chain in &background {
        let line = render_chain(plan, chain, format);
        let _ = match format {
            ScriptFormat::Batch => writeln!(script, "start \"\" /B {line}"),
            _ => writeln!(script, "{line} &"),
        };
    }
    for chain in &foreground {
        let _ = writeln!(script, "{}", render_chain(plan, chain, format));
    }

    Ok(script)
}

/// Write a runnable script and every auxiliary file the plan reads.
#[instrument(name = "export_script", skip(plan))]
pub fn export_script(
    plan: &LaunchPlan,
    format: ScriptFormat,
    script_path: &Path,
) -> Result<(), ExportError> {
    let script = render_script(plan, format)?;

    for file in &plan.files {
        write_file(&file.path, &file.contents)?;
    }
    write_file(script_path, &script)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if format == ScriptFormat::Posix {
            let executable = fs::Permissions::from_mode(0o755);
            fs::set_permissions(script_path, executable).map_err(|source| ExportError::Write {
                path: script_path.to_path_buf(),
                source,
            })?;
        }
    }

    info!(files = plan.files.len(), "Launch script exported");
    Ok(())
}

fn write_file(path: &Path, contents: &str) -> Result<(), ExportError> {
    let write = || -> std::io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)
    };
    write().map_err(|source| ExportError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Processes grouped into pipe chains, in launch order of their first member.
fn pipelines(plan: &LaunchPlan) -> Result<Vec<Vec<ProcessId>>, PlanError> {
    let order = plan.launch_order()?;
    let mut chains = Vec::new();

    for id in order {
        if plan.pipe_source(id).is_some() {
            continue;
        }
        let mut chain = vec![id];
        let mut last = id;
        while let Some(next) = pipe_target(plan, last) {
            chain.push(next);
            last = next;
        }
        chains.push(chain);
    }
    Ok(chains)
}

fn pipe_target(plan: &LaunchPlan, from: ProcessId) -> Option<ProcessId> {
    plan.links
        .iter()
        .find(|link| link.from == from && link.transport == LinkTransport::Pipe)
        .map(|link| link.to)
}

fn render_chain(plan: &LaunchPlan, chain: &[ProcessId], format: ScriptFormat) -> String {
    chain
        .iter()
        .filter_map(|id| plan.process(*id))
        .map(|spec| {
            spec.invocation
                .argv()
                .iter()
                .map(|arg| format.quote(arg))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join(" | ")
}

fn plain_quote(arg: &str) -> String {
    if arg.is_empty() || arg.contains(char::is_whitespace) {
        format!("\"{arg}\"")
    } else {
        arg.to_string()
    }
}

fn posix_quote(arg: &str) -> String {
    let safe = |c: char| c.is_ascii_alphanumeric() || "_@%+=:,./-".contains(c);
    if !arg.is_empty() && arg.chars().all(safe) {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', "'\\''"))
}

fn batch_quote(arg: &str) -> String {
    let escaped = arg.replace('%', "%%");
    let special = |c: char| c.is_whitespace() || "&|<>^\"(),;=".contains(c);
    if !escaped.is_empty() && !escaped.contains(special) {
        return escaped;
    }
    format!("\"{}\"", escaped.replace('"', "\"\""))
}
