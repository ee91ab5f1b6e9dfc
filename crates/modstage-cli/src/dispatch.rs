use std::collections::HashSet;
use std::io;

use anyhow::{bail, Context, Result};
use modstage_core::ProjectManifest;
use modstage_installer::{
    AppLayout, CommandHandlerProvider, EntryPointContext, InstallFlags, InstallLedger, Installer,
    MemoryReporter,
};
use modstage_resolver::{ResolutionChain, ResolveError};
use serde::Serialize;
use tracing::debug;

use crate::completion::write_completions_script;
use crate::render::{current_output_style, render_status_line, ConsoleReporter, OutputStyle};
use crate::{params_map, Cli, Commands, HookFilter};

pub(crate) fn run_cli(cli: Cli) -> Result<()> {
    let layout = AppLayout::new(cli.app_root.clone());

    match cli.command {
        Commands::Install { entrypoint, only } => {
            let mut installer = open_installer(&layout)?;
            let succeeded = match entrypoint.as_deref() {
                Some(entrypoint) => installer.install_entry_point(entrypoint)?,
                None => installer.install_application(hook_flags(&only))?,
            };
            finish(succeeded, installer.reporter().errors())
        }
        Commands::InstallModules {
            modules,
            entrypoint,
            params,
        } => {
            let mut installer = open_installer(&layout)?;
            if !params.is_empty() {
                let parameters = params_map(params);
                for module in &modules {
                    installer.set_module_parameters(
                        module,
                        parameters.clone(),
                        entrypoint.as_deref(),
                    )?;
                }
            }
            let succeeded = installer.install_modules(&modules, entrypoint.as_deref())?;
            finish(succeeded, installer.reporter().errors())
        }
        Commands::UninstallModules {
            modules,
            entrypoint,
        } => {
            let mut installer = open_installer(&layout)?;
            let succeeded = installer.uninstall_modules(&modules, entrypoint.as_deref())?;
            finish(succeeded, installer.reporter().errors())
        }
        Commands::Status { json } => {
            let report = collect_status(&layout)?;
            if json {
                let rendered = serde_json::to_string_pretty(&report)
                    .context("failed to serialize status report")?;
                println!("{rendered}");
            } else {
                for line in format_status_lines(&report, current_output_style()) {
                    println!("{line}");
                }
            }
            Ok(())
        }
        Commands::Completions { shell } => {
            let mut stdout = io::stdout();
            write_completions_script(shell, &mut stdout)
        }
    }
}

type ConsoleInstaller = Installer<ConsoleReporter<io::Stdout>, CommandHandlerProvider>;

fn open_installer(layout: &AppLayout) -> Result<ConsoleInstaller> {
    let reporter = ConsoleReporter::stdout(current_output_style());
    let provider = CommandHandlerProvider::new(layout.root());
    Installer::open(layout, reporter, provider)
        .with_context(|| format!("failed to open application at {}", layout.root().display()))
}

fn finish(succeeded: bool, errors: usize) -> Result<()> {
    if !succeeded {
        bail!("installation finished with {errors} error(s)");
    }
    Ok(())
}

pub(crate) fn hook_flags(only: &[HookFilter]) -> InstallFlags {
    if only.is_empty() {
        return InstallFlags::ALL;
    }
    only.iter().fold(InstallFlags::NONE, |flags, filter| {
        flags
            | match filter {
                HookFilter::Install => InstallFlags::INSTALL,
                HookFilter::Upgrade => InstallFlags::UPGRADE,
                HookFilter::Remove => InstallFlags::REMOVE,
            }
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct StatusReport {
    pub(crate) entrypoints: Vec<EntryPointStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct EntryPointStatus {
    pub(crate) id: String,
    pub(crate) file: String,
    pub(crate) kind: String,
    pub(crate) installers_disabled: bool,
    pub(crate) modules: Vec<ModuleStatus>,
    pub(crate) pending: Vec<PendingAction>,
    pub(crate) conflict: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct ModuleStatus {
    pub(crate) name: String,
    pub(crate) enabled: bool,
    pub(crate) installed: bool,
    pub(crate) installed_version: Option<String>,
    pub(crate) source_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct PendingAction {
    pub(crate) module: String,
    pub(crate) action: String,
}

/// Reads the application without claiming the install lock or touching
/// the ledger.
pub(crate) fn collect_status(layout: &AppLayout) -> Result<StatusReport> {
    let project = ProjectManifest::load(&layout.project_manifest_path())?;
    let ledger = InstallLedger::open(layout.ledger_path())?;

    let mut configs = HashSet::new();
    let mut contexts = Vec::new();
    for decl in &project.entrypoints {
        if !configs.insert(decl.config.as_str()) {
            debug!(entry_point = %decl.file, "config already listed, skipping");
            continue;
        }
        contexts.push(EntryPointContext::load(layout, decl, &ledger)?);
    }

    let installer = Installer::from_parts(
        ledger,
        contexts,
        MemoryReporter::new(),
        CommandHandlerProvider::new(layout.root()),
    );
    let previews = installer.preview()?;
    let entrypoints = installer
        .entry_points()
        .iter()
        .zip(previews)
        .map(|(entry_point, (_, resolved))| entry_point_status(entry_point, resolved))
        .collect();
    Ok(StatusReport { entrypoints })
}

fn entry_point_status(
    entry_point: &EntryPointContext,
    resolved: Result<ResolutionChain, ResolveError>,
) -> EntryPointStatus {
    let modules = entry_point
        .modules()
        .iter()
        .map(|module| ModuleStatus {
            name: module.name.clone(),
            enabled: module.enabled,
            installed: module.installed,
            installed_version: module
                .installed_version
                .as_ref()
                .map(ToString::to_string),
            source_version: module.source_version().to_string(),
        })
        .collect();
    let (pending, conflict) = match resolved {
        Ok(chain) => (
            chain
                .iter()
                .map(|entry| PendingAction {
                    module: entry.name.clone(),
                    action: entry.action.to_string(),
                })
                .collect(),
            None,
        ),
        Err(err) => (Vec::new(), Some(err.to_string())),
    };

    EntryPointStatus {
        id: entry_point.id().to_string(),
        file: entry_point.file().to_string(),
        kind: entry_point.kind().as_str().to_string(),
        installers_disabled: entry_point.installers_disabled(),
        modules,
        pending,
        conflict,
    }
}

pub(crate) fn format_status_lines(report: &StatusReport, style: OutputStyle) -> Vec<String> {
    let mut lines = Vec::new();
    for entry_point in &report.entrypoints {
        lines.push(format!(
            "entry point {} ({}, {})",
            entry_point.id, entry_point.file, entry_point.kind
        ));
        if entry_point.installers_disabled {
            lines.push(render_status_line(
                style,
                "warn",
                "  module installers disabled",
            ));
        }
        for module in &entry_point.modules {
            let (status, state) = match module.installed_version.as_deref() {
                Some(version) if module.installed && version == module.source_version => {
                    ("ok", format!("installed {version}"))
                }
                Some(version) if module.installed => (
                    "warn",
                    format!("installed {version}, source {}", module.source_version),
                ),
                _ if !module.enabled => ("step", "disabled".to_string()),
                _ => ("step", format!("not installed, source {}", module.source_version)),
            };
            lines.push(render_status_line(
                style,
                status,
                &format!("  {}: {state}", module.name),
            ));
        }
        if let Some(conflict) = &entry_point.conflict {
            lines.push(render_status_line(
                style,
                "error",
                &format!("  conflict: {conflict}"),
            ));
        } else if entry_point.pending.is_empty() {
            lines.push(render_status_line(style, "ok", "  up to date"));
        } else {
            let pending = entry_point
                .pending
                .iter()
                .map(|action| format!("{} {}", action.action, action.module))
                .collect::<Vec<_>>()
                .join(", ");
            lines.push(render_status_line(
                style,
                "step",
                &format!("  pending: {pending}"),
            ));
        }
    }
    lines
}
