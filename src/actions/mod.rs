// src/actions/mod.rs

//! Lifecycle action execution
//!
//! Each component carries ordered `before`/`after` hooks per lifecycle
//! (onCreate, onDeploy, onRemove) plus `onSuccess`/`onFailure` hooks that
//! fire once the containing set has finished. An action is either a shell
//! command or a wait; the runner is a plain loop over a slice with a small
//! state machine per action.

use anyhow::{Context, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::io::Read;
use std::net::TcpStream;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

use crate::config::{CancelToken, TF_VAR_ENV_PREFIX};
use crate::error::Error;
use crate::template::{apply_to_text, TemplateMap};
use crate::types::component::{ZarfAction, ZarfActionSet, ZarfActionWaitCluster};
use crate::types::{SetVariable, Variable};

/// Poll cadence for wait actions
const WAIT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default budget for wait actions with no explicit maxTotalSeconds
const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(300);

/// Lifecycle of a single action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionState {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

/// Evaluates cluster wait conditions; the deployer supplies one backed by
/// the cluster adapter, create-time runs have none.
pub trait ClusterWaiter {
    fn condition_met(&self, wait: &ZarfActionWaitCluster) -> Result<bool>;
}

/// Runs the actions of one component lifecycle
pub struct ActionRunner<'a> {
    /// Values substituted into commands, grown by setVariables
    variables: &'a mut BTreeMap<String, SetVariable>,
    cluster: Option<&'a dyn ClusterWaiter>,
    cancel: CancelToken,
}

impl<'a> ActionRunner<'a> {
    pub fn new(
        variables: &'a mut BTreeMap<String, SetVariable>,
        cluster: Option<&'a dyn ClusterWaiter>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            variables,
            cluster,
            cancel,
        }
    }

    /// Run `before` hooks, the provided work, then `after` hooks; fire
    /// `onSuccess`/`onFailure` once everything settles. The original error
    /// always wins over onFailure failures.
    pub fn with_lifecycle<T>(
        &mut self,
        set: &ZarfActionSet,
        work: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let result: Result<T> = (|| {
            self.run_list(set, &set.before)?;
            let value = work(self)?;
            self.run_list(set, &set.after)?;
            Ok(value)
        })();

        match result {
            Ok(value) => {
                self.run_list(set, &set.on_success)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(failure_err) = self.run_list(set, &set.on_failure) {
                    warn!(error = %failure_err, "onFailure actions also failed");
                }
                Err(err)
            }
        }
    }

    /// Run one ordered list of actions, stopping at the first failure.
    pub fn run_list(&mut self, set: &ZarfActionSet, actions: &[ZarfAction]) -> Result<()> {
        for action in actions {
            self.cancel.check()?;
            let resolved = resolve_defaults(action, set);
            self.run_one(&resolved)?;
        }
        Ok(())
    }

    fn run_one(&mut self, action: &ZarfAction) -> Result<()> {
        let description = action
            .description
            .clone()
            .or_else(|| action.cmd.clone())
            .unwrap_or_else(|| "wait".to_string());

        let mut state = ActionState::Pending;
        debug!(action = %description, state = ?state, "action queued");
        state = ActionState::Running;
        debug!(action = %description, state = ?state, "action running");

        let outcome = if let Some(cmd) = &action.cmd {
            self.run_command(action, cmd)
        } else if action.wait.is_some() {
            self.run_wait(action)
        } else {
            Err(Error::validation(format!(
                "action {description:?} must define either cmd or wait"
            ))
            .into())
        };

        state = match &outcome {
            Ok(()) => ActionState::Succeeded,
            Err(err) if err.to_string().contains("timed out") => ActionState::TimedOut,
            Err(_) => ActionState::Failed,
        };
        debug!(action = %description, state = ?state, "action finished");
        outcome
    }

    fn run_command(&mut self, action: &ZarfAction, cmd: &str) -> Result<()> {
        let templated = apply_to_text(cmd, &self.variable_template_map());
        let description = action.description.clone().unwrap_or_else(|| cmd.to_string());

        let total_budget = action.max_total_seconds.map(Duration::from_secs);
        let deadline = total_budget.map(|budget| Instant::now() + budget);
        let attempts = action.max_retries.unwrap_or(0).saturating_add(1);

        let mut last_err = None;
        for attempt in 1..=attempts {
            self.cancel.check()?;
            let remaining = match deadline {
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return Err(Error::action(
                            &description,
                            format!(
                                "timed out after {} seconds",
                                total_budget.unwrap_or_default().as_secs()
                            ),
                        )
                        .into());
                    }
                    Some(left)
                }
                None => None,
            };

            match self.run_command_once(action, &templated, remaining) {
                Ok(stdout) => {
                    self.capture_set_variables(action, &stdout)?;
                    return Ok(());
                }
                Err(err) => {
                    if attempt < attempts {
                        info!(
                            action = %description,
                            attempt,
                            "action failed, retrying: {err:#}"
                        );
                    }
                    last_err = Some(err);
                }
            }
        }

        let err = last_err.expect("at least one attempt ran");
        Err(Error::action(&description, format!("{err:#}")).into())
    }

    fn run_command_once(
        &self,
        action: &ZarfAction,
        cmd: &str,
        timeout: Option<Duration>,
    ) -> Result<String> {
        let mut command = shell_command(cmd);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if !action.dir.is_empty() {
            command.current_dir(&action.dir);
        }

        for entry in &action.env {
            if let Some((key, value)) = entry.split_once('=') {
                command.env(key, value);
            }
        }
        for variable in self.variables.values() {
            command.env(format!("ZARF_VAR_{}", variable.name), &variable.value);
        }
        for (key, value) in std::env::vars() {
            if key.starts_with(TF_VAR_ENV_PREFIX) {
                command.env(key, value);
            }
        }

        let mut child = command.spawn().context("Failed to spawn action command")?;

        let status = match timeout {
            Some(timeout) => match child.wait_timeout(timeout)? {
                Some(status) => status,
                None => {
                    let _ = child.kill();
                    let _ = child.wait();
                    anyhow::bail!("timed out after {} seconds", timeout.as_secs());
                }
            },
            None => child.wait()?,
        };

        let mut stdout = String::new();
        if let Some(mut pipe) = child.stdout.take() {
            pipe.read_to_string(&mut stdout).ok();
        }
        let mut stderr = String::new();
        if let Some(mut pipe) = child.stderr.take() {
            pipe.read_to_string(&mut stderr).ok();
        }

        if !action.mute {
            for line in stdout.lines() {
                info!("  {line}");
            }
            for line in stderr.lines() {
                warn!("  {line}");
            }
        }

        if !status.success() {
            anyhow::bail!(
                "command exited with code {}: {}",
                status.code().unwrap_or(-1),
                stderr.lines().last().unwrap_or("no output")
            );
        }
        Ok(stdout)
    }

    fn capture_set_variables(&mut self, action: &ZarfAction, stdout: &str) -> Result<()> {
        if action.set_variables.is_empty() {
            return Ok(());
        }

        let name_pattern = Regex::new(r"^[A-Z0-9_]+$").expect("const regex");
        let mut line_values = BTreeMap::new();
        for line in stdout.lines() {
            if let Some((name, value)) = line.split_once('=') {
                if name_pattern.is_match(name) {
                    line_values.insert(name.to_string(), value.to_string());
                }
            }
        }

        for declared in &action.set_variables {
            if !name_pattern.is_match(&declared.name) {
                return Err(Error::validation(format!(
                    "setVariables name {:?} must match ^[A-Z0-9_]+$",
                    declared.name
                ))
                .into());
            }
            // a name=value line wins, otherwise the whole stdout is the value
            let value = line_values
                .get(&declared.name)
                .cloned()
                .unwrap_or_else(|| stdout.trim_end_matches('\n').to_string());
            self.set_variable(declared, value);
        }
        Ok(())
    }

    fn set_variable(&mut self, declared: &Variable, value: String) {
        debug!(
            name = %declared.name,
            value = %if declared.sensitive { "**sanitized**" } else { value.as_str() },
            "action set variable"
        );
        self.variables.insert(
            declared.name.clone(),
            SetVariable::from_variable(declared, value),
        );
    }

    fn run_wait(&self, action: &ZarfAction) -> Result<()> {
        let wait = action.wait.as_ref().expect("caller checked wait");
        let description = action
            .description
            .clone()
            .unwrap_or_else(|| "wait action".to_string());
        let budget = action
            .max_total_seconds
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_WAIT_TIMEOUT);
        let deadline = Instant::now() + budget;

        loop {
            self.cancel.check()?;

            let satisfied = if let Some(cluster) = &wait.cluster {
                match self.cluster {
                    Some(waiter) => waiter.condition_met(cluster)?,
                    None => {
                        return Err(Error::cluster(format!(
                            "wait action {description:?} needs a cluster connection"
                        ))
                        .into())
                    }
                }
            } else if let Some(network) = &wait.network {
                network_condition_met(&network.protocol, &network.address, network.code)
            } else {
                return Err(Error::validation(format!(
                    "wait action {description:?} must define cluster or network"
                ))
                .into());
            };

            if satisfied {
                return Ok(());
            }
            if Instant::now() + WAIT_POLL_INTERVAL > deadline {
                return Err(Error::action(
                    &description,
                    format!("timed out after {} seconds", budget.as_secs()),
                )
                .into());
            }
            std::thread::sleep(WAIT_POLL_INTERVAL);
        }
    }

    fn variable_template_map(&self) -> TemplateMap {
        let mut map = TemplateMap::new();
        for variable in self.variables.values() {
            map.insert(
                format!("###ZARF_VAR_{}###", variable.name),
                crate::template::TemplateValue {
                    value: variable.value.clone(),
                    sensitive: variable.sensitive,
                    auto_indent: false,
                    variable_type: variable.variable_type,
                },
            );
        }
        map
    }
}

fn resolve_defaults(action: &ZarfAction, set: &ZarfActionSet) -> ZarfAction {
    let mut resolved = action.clone();
    let defaults = &set.defaults;
    if resolved.max_total_seconds.is_none() {
        resolved.max_total_seconds = defaults.max_total_seconds;
    }
    if resolved.max_retries.is_none() {
        resolved.max_retries = defaults.max_retries;
    }
    if resolved.dir.is_empty() {
        resolved.dir = defaults.dir.clone();
    }
    if !defaults.env.is_empty() {
        let mut env = defaults.env.clone();
        env.extend(resolved.env);
        resolved.env = env;
    }
    if defaults.mute {
        resolved.mute = true;
    }
    resolved
}

#[cfg(unix)]
fn shell_command(cmd: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(cmd);
    command
}

#[cfg(windows)]
fn shell_command(cmd: &str) -> Command {
    let mut command = Command::new("cmd");
    command.arg("/c").arg(cmd);
    command
}

fn network_condition_met(protocol: &str, address: &str, code: Option<u16>) -> bool {
    match protocol {
        "tcp" => TcpStream::connect(address).is_ok(),
        "http" | "https" => {
            let url = format!("{protocol}://{address}");
            match reqwest::blocking::get(&url) {
                Ok(response) => match code {
                    Some(code) => response.status().as_u16() == code,
                    None => response.status().is_success(),
                },
                Err(_) => false,
            }
        }
        _ => false,
    }
}
