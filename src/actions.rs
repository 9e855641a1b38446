// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use log::debug;

use crate::sched::{Output, RunContext};
use crate::task::{ActionConfig, ActionRegistry};

pub fn register_builtins(registry: &mut ActionRegistry) {
    registry.register("exec", Box::new(exec_factory));
    registry.register("pty-script", Box::new(pty_script_factory));
}

///
/// `action = "exec"`: run an argv in the node's workdir, with `{...}` placeholders in each
/// argument resolved against the binding, outputs, and inputs. Non-zero exit is failure.
///
fn exec_factory(config: &ActionConfig<'_>) -> Result<Arc<dyn crate::task::Action>, String> {
    let argv: Vec<String> = match config.table.get("argv") {
        Some(toml::Value::Array(values)) => values
            .iter()
            .map(|v| match v {
                toml::Value::String(s) => Ok(s.clone()),
                other => Err(format!("exec argv elements must be strings, got {other}")),
            })
            .collect::<Result<_, _>>()?,
        Some(other) => return Err(format!("exec argv must be an array, got {other}")),
        None => return Err("exec requires an argv".to_owned()),
    };
    if argv.is_empty() {
        return Err("exec argv must not be empty".to_owned());
    }

    Ok(Arc::new(move |ctx: &mut RunContext<'_>| -> Result<(), String> {
        let argv: Vec<String> = argv
            .iter()
            .map(|template| interpolate(template, ctx))
            .collect::<Result<_, String>>()?;
        debug!("exec {argv:?}");
        let status = Command::new(&argv[0])
            .args(&argv[1..])
            .current_dir(&ctx.workdir)
            .env("TMPDIR", &ctx.tmpdir)
            .status()
            .map_err(|e| format!("Failed to exec {:?}: {e}", argv[0]))?;
        if !status.success() {
            return Err(format!("Command {:?} exited with {status}", argv[0]));
        }
        Ok(())
    }))
}

///
/// `action = "pty-script"`: drive a match/expect script (path relative to the task file)
/// against a child on a pseudo-terminal. `{...}` placeholders in the script text resolve the
/// same way as exec arguments.
///
fn pty_script_factory(config: &ActionConfig<'_>) -> Result<Arc<dyn crate::task::Action>, String> {
    let script: PathBuf = match config.table.get("script") {
        Some(toml::Value::String(s)) => config.task_dir.join(s),
        Some(other) => return Err(format!("pty-script script must be a string, got {other}")),
        None => return Err("pty-script requires a script".to_owned()),
    };
    let timeout = match config.table.get("timeout") {
        None => None,
        Some(toml::Value::Integer(i)) if *i >= 0 => Some(Duration::from_secs(*i as u64)),
        Some(toml::Value::Float(f)) if *f >= 0.0 => Some(Duration::from_secs_f64(*f)),
        Some(other) => {
            return Err(format!(
                "pty-script timeout must be a non-negative number, got {other}"
            ));
        }
    };

    Ok(Arc::new(move |ctx: &mut RunContext<'_>| -> Result<(), String> {
        let text = std::fs::read_to_string(&script)
            .map_err(|e| format!("Failed to read script {}: {e}", script.display()))?;
        let text = interpolate(&text, ctx)?;
        let parsed = ptyscript::parse_source(&text, &script.display().to_string())?;
        let code = ptyscript::Driver::run(&parsed, timeout)?;
        if code != 0 {
            return Err(format!(
                "Script {} exited with status {code}",
                script.display()
            ));
        }
        Ok(())
    }))
}

///
/// Placeholder resolution for action configuration: `{param}` is the bound parameter's
/// canonical form, `{output:NAME}` the declared output's path, and `{input:ALIAS:NAME}` the
/// named output of a resolved input.
///
pub fn interpolate(template: &str, ctx: &RunContext<'_>) -> Result<String, String> {
    let mut out = String::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        rest = &rest[open + 1..];
        let close = rest
            .find('}')
            .ok_or_else(|| format!("Unbalanced braces in template '{template}'"))?;
        let key = &rest[..close];
        rest = &rest[close + 1..];

        if let Some(name) = key.strip_prefix("output:") {
            let output = ctx
                .outputs
                .get(name)
                .and_then(|o| o.as_ref())
                .ok_or_else(|| format!("Reference to unknown output '{name}'"))?;
            out.push_str(&output_str(output));
        } else if let Some(spec) = key.strip_prefix("input:") {
            let (alias, name) = spec
                .split_once(':')
                .ok_or_else(|| format!("Malformed input reference '{key}'"))?;
            let input = ctx
                .inputs
                .get(alias)
                .ok_or_else(|| format!("Reference to unknown input '{alias}'"))?;
            let output = input
                .outputs
                .get(name)
                .ok_or_else(|| format!("Input '{alias}' has no output '{name}'"))?;
            out.push_str(&output_str(output));
        } else {
            let value = ctx
                .params
                .get(key)
                .ok_or_else(|| format!("Reference to unknown parameter '{key}'"))?;
            out.push_str(&value.canonical());
        }
    }
    out.push_str(rest);
    Ok(out)
}

fn output_str(output: &Output) -> String {
    match output {
        Output::Path(path) => path.display().to_string(),
        Output::Data(value) => value.canonical(),
    }
}
