use std::path::PathBuf;
use std::process::Command;

use anyhow::{anyhow, Context};
use modstage_core::HookCommands;
use tracing::debug;

use crate::descriptor::ModuleDescriptor;
use crate::entrypoint::EntryPointContext;
use crate::error::HookError;
use crate::hooks::{HandlerProvider, HookContext, ModuleInstaller, Upgrader};

/// Runs the shell commands a module manifest binds to its hooks.
#[derive(Debug, Clone)]
pub struct CommandHandlerProvider {
    app_root: PathBuf,
}

impl CommandHandlerProvider {
    pub fn new(app_root: impl Into<PathBuf>) -> Self {
        Self {
            app_root: app_root.into(),
        }
    }
}

impl HandlerProvider for CommandHandlerProvider {
    fn installer(
        &mut self,
        module: &ModuleDescriptor,
        _entry_point: &EntryPointContext,
        _whole_app: bool,
    ) -> anyhow::Result<Option<Box<dyn ModuleInstaller>>> {
        if module.manifest.hooks.is_empty() {
            return Ok(None);
        }
        Ok(Some(Box::new(CommandInstaller::new(
            self.app_root.clone(),
            module.manifest.hooks.clone(),
        ))))
    }

    fn upgraders(
        &mut self,
        module: &ModuleDescriptor,
        _entry_point: &EntryPointContext,
    ) -> anyhow::Result<Vec<Upgrader>> {
        Ok(module
            .manifest
            .upgraders
            .iter()
            .map(|spec| Upgrader {
                version: spec.version.clone(),
                date: spec.date.clone(),
                handler: Box::new(CommandInstaller::new(
                    self.app_root.clone(),
                    spec.hooks.clone(),
                )),
            })
            .collect())
    }
}

#[derive(Debug, Clone)]
pub struct CommandInstaller {
    app_root: PathBuf,
    hooks: HookCommands,
}

impl CommandInstaller {
    pub fn new(app_root: PathBuf, hooks: HookCommands) -> Self {
        Self { app_root, hooks }
    }

    fn run(&self, hook: &str, commands: &[String], ctx: &HookContext<'_>) -> Result<(), HookError> {
        for command_line in commands {
            let mut command = shell_command(command_line);
            command
                .current_dir(&self.app_root)
                .env("MODSTAGE_HOOK", hook)
                .env("MODSTAGE_MODULE", ctx.module)
                .env("MODSTAGE_ENTRYPOINT", ctx.entry_point.id())
                .env("MODSTAGE_CONFIG", ctx.entry_point.config_path())
                .env("MODSTAGE_APP_ROOT", &self.app_root);
            if ctx.whole_app {
                command.env("MODSTAGE_WHOLE_APP", "1");
            }
            for (name, value) in &ctx.parameters {
                command.env(parameter_env_name(name), value);
            }

            debug!(module = ctx.module, hook, command = %command_line, "running hook command");
            let output = command
                .output()
                .with_context(|| format!("{hook} command failed to start: {command_line}"))?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(HookError::Runtime(anyhow!(
                    "{hook} command '{command_line}' failed: status={} stderr='{}'",
                    output.status,
                    stderr.trim()
                )));
            }
        }
        Ok(())
    }
}

impl ModuleInstaller for CommandInstaller {
    fn pre_install(&mut self, ctx: &mut HookContext<'_>) -> Result<(), HookError> {
        self.run("pre_install", &self.hooks.pre_install, ctx)
    }

    fn install(&mut self, ctx: &mut HookContext<'_>) -> Result<(), HookError> {
        self.run("install", &self.hooks.install, ctx)
    }

    fn post_install(&mut self, ctx: &mut HookContext<'_>) -> Result<(), HookError> {
        self.run("post_install", &self.hooks.post_install, ctx)
    }

    fn pre_uninstall(&mut self, ctx: &mut HookContext<'_>) -> Result<(), HookError> {
        self.run("pre_uninstall", &self.hooks.pre_uninstall, ctx)
    }

    fn uninstall(&mut self, ctx: &mut HookContext<'_>) -> Result<(), HookError> {
        self.run("uninstall", &self.hooks.uninstall, ctx)
    }

    fn post_uninstall(&mut self, ctx: &mut HookContext<'_>) -> Result<(), HookError> {
        self.run("post_uninstall", &self.hooks.post_uninstall, ctx)
    }
}

fn shell_command(command_line: &str) -> Command {
    if cfg!(windows) {
        let mut command = Command::new("cmd");
        command.arg("/C").arg(command_line);
        command
    } else {
        let mut command = Command::new("sh");
        command.arg("-c").arg(command_line);
        command
    }
}

pub(crate) fn parameter_env_name(name: &str) -> String {
    let normalized = name
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() {
                ch.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect::<String>();
    format!("MODSTAGE_PARAM_{normalized}")
}
