// src/recipe/kitchen/steps.rs

//! Running install and test steps
//!
//! Each step is a `sh -c` command line with `%(var)s` placeholders. stdout
//! and stderr both go to `<logs>/<phase>-<NN>.log`, read back once the step
//! exits.

use super::Kitchen;
use super::status::AbortHandle;
use crate::error::{Error, Result, StepPhase};
use crate::recipe::{BuildMethod, Recipe, Step};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, info};
use wait_timeout::ChildExt;

/// Runs the steps of one recipe against one keg
pub(super) struct StepRunner<'a> {
    recipe: &'a Recipe,
    keg: PathBuf,
    shared_bin: PathBuf,
    jobs: u32,
    timeout: Duration,
    context: BTreeMap<String, String>,
    abort: Option<&'a AbortHandle>,
    log: String,
}

impl<'a> StepRunner<'a> {
    pub(super) fn new(
        kitchen: &Kitchen,
        recipe: &'a Recipe,
        method: BuildMethod,
        keg: &Path,
    ) -> Self {
        let jobs = match recipe.jobs {
            Some(n) => n.min(kitchen.config.jobs.max(1)),
            None => kitchen.config.jobs.max(1),
        };

        let mut context = BTreeMap::new();
        let keg_str = keg.display().to_string();
        context.insert("prefix".to_string(), keg_str.clone());
        for dir in ["bin", "lib", "include", "share"] {
            context.insert(dir.to_string(), format!("{}/{}", keg_str, dir));
        }
        context.insert(
            "doc".to_string(),
            format!("{}/share/doc/{}", keg_str, recipe.name),
        );
        context.insert("jobs".to_string(), jobs.to_string());
        let flags: Vec<String> = recipe.flags.iter().map(|f| shell_quote(f)).collect();
        context.insert("flags".to_string(), flags.join(" "));
        context.insert(
            "home".to_string(),
            kitchen.prefix.root().display().to_string(),
        );
        for dep in recipe.dependencies_for(method) {
            context.insert(
                format!("opt:{}", dep.name),
                kitchen.prefix.opt_path(&dep.name).display().to_string(),
            );
        }

        Self {
            recipe,
            keg: keg.to_path_buf(),
            shared_bin: kitchen.prefix.bin(),
            jobs,
            timeout: kitchen.config.timeout,
            context,
            abort: None,
            log: String::new(),
        }
    }

    pub(super) fn with_abort(mut self, abort: &'a AbortHandle) -> Self {
        self.abort = Some(abort);
        self
    }

    pub(super) fn set_var(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.context.insert(key.into(), value.into());
    }

    pub(super) fn into_log(self) -> String {
        self.log
    }

    /// Run `steps` in order inside `workdir`, stopping at the first failure
    pub(super) fn run_all(
        &mut self,
        phase: StepPhase,
        steps: &[Step],
        workdir: &Path,
        logs: &Path,
    ) -> Result<()> {
        fs::create_dir_all(logs)?;
        for (index, step) in steps.iter().enumerate() {
            if let Some(abort) = self.abort
                && abort.is_aborted()
            {
                return Err(Error::Aborted {
                    recipe: self.recipe.name.clone(),
                    stage: format!("{} step {}", phase, index + 1),
                });
            }
            self.run_step(phase, index, step, workdir, logs)?;
        }
        Ok(())
    }

    fn run_step(
        &mut self,
        phase: StepPhase,
        index: usize,
        step: &Step,
        workdir: &Path,
        logs: &Path,
    ) -> Result<()> {
        let command = self.recipe.substitute(&step.run, &self.context);
        let dir = match &step.workdir {
            Some(w) => workdir.join(self.recipe.substitute(w, &self.context)),
            None => workdir.to_path_buf(),
        };
        let log_path = logs.join(format!("{}-{:02}.log", phase, index + 1));

        info!("{}: {} step {}: {}", self.recipe.name, phase, index + 1, command);
        let started = Instant::now();
        let status = self.spawn_and_wait(step, &command, &dir, &log_path);
        let output = fs::read(&log_path)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default();

        self.log.push_str(&format!("=== {} {}: {} ===\n", phase, index + 1, command));
        self.log.push_str(&output);
        if !output.is_empty() && !output.ends_with('\n') {
            self.log.push('\n');
        }

        let fail = |status: Option<i32>, reason: String| Error::StepExecution {
            recipe: self.recipe.name.clone(),
            phase,
            index,
            command: command.clone(),
            status,
            output: output.clone(),
            reason,
        };

        let status = match status {
            Ok(Some(status)) => status,
            Ok(None) => {
                return Err(fail(
                    None,
                    format!("timed out after {}s", self.timeout.as_secs()),
                ));
            }
            Err(e) => return Err(fail(None, format!("could not start: {}", e))),
        };

        match status.code() {
            Some(code) if code == step.expect_status => {}
            Some(code) => {
                return Err(fail(
                    Some(code),
                    format!("exited with status {} (expected {})", code, step.expect_status),
                ));
            }
            None => return Err(fail(None, "terminated by signal".to_string())),
        }

        for expected in &step.expect_output {
            let expected = self.recipe.substitute(expected, &self.context);
            if !output.contains(&expected) {
                return Err(fail(
                    status.code(),
                    format!("output does not contain `{}`", expected),
                ));
            }
        }

        debug!("{} step {} done in {:?}", phase, index + 1, started.elapsed());
        Ok(())
    }

    /// Returns `Ok(None)` when the step was killed for exceeding the timeout
    fn spawn_and_wait(
        &self,
        step: &Step,
        command: &str,
        dir: &Path,
        log_path: &Path,
    ) -> std::io::Result<Option<std::process::ExitStatus>> {
        let log = File::create(log_path)?;
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(dir)
            .envs(self.environment(step))
            .stdin(Stdio::null())
            .stdout(log.try_clone()?)
            .stderr(log)
            .spawn()?;

        match child.wait_timeout(self.timeout)? {
            Some(status) => Ok(Some(status)),
            None => {
                child.kill()?;
                child.wait()?;
                Ok(None)
            }
        }
    }

    fn environment(&self, step: &Step) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();

        let path = match std::env::var("PATH") {
            Ok(existing) if !existing.is_empty() => {
                format!("{}:{}", self.shared_bin.display(), existing)
            }
            _ => self.shared_bin.display().to_string(),
        };
        env.insert("PATH".to_string(), path);

        let jobs = if step.serial { 1 } else { self.jobs };
        env.insert("MAKEFLAGS".to_string(), format!("-j{}", jobs));
        env.insert("LARDER_PREFIX".to_string(), self.keg.display().to_string());
        env.insert("LARDER_NAME".to_string(), self.recipe.name.clone());
        env.insert("LARDER_VERSION".to_string(), self.recipe.version.clone());

        for (key, value) in self.recipe.environment.iter().chain(&step.environment) {
            env.insert(key.clone(), self.recipe.substitute(value, &self.context));
        }
        env
    }
}

/// Quote a word for `sh` unless it is made only of safe characters
fn shell_quote(word: &str) -> String {
    let safe = |c: char| c.is_ascii_alphanumeric() || "-_=+@%:,./".contains(c);
    if !word.is_empty() && word.chars().all(safe) {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', "'\\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::kitchen::KitchenConfig;
    use crate::recipe::parse_recipe;
    use crate::platform::Platform;
    use tempfile::TempDir;

    fn kitchen(tmp: &TempDir) -> Kitchen {
        Kitchen::new(KitchenConfig {
            prefix: tmp.path().join("prefix"),
            source_cache: tmp.path().join("cache"),
            timeout: Duration::from_secs(5),
            jobs: 4,
            ..Default::default()
        })
        .unwrap()
    }

    fn recipe(extra: &str) -> Recipe {
        let text = format!(
            r#"
[package]
name = "demo"
version = "1.0"

[source]
url = "file:///dev/null"
checksum = "sha256:{}"

[dependencies]
runtime = ["zlib"]

[build]
flags = ["--enable-a", "--enable-b"]
environment = {{ DEMO_MODE = "%(version)s-fast" }}
jobs = 2
{}
"#,
            "e".repeat(64),
            extra
        );
        parse_recipe(&text, &Platform::detect()).unwrap()
    }

    #[test]
    fn test_placeholders_and_environment() {
        let tmp = TempDir::new().unwrap();
        let kitchen = kitchen(&tmp);
        let recipe = recipe("");
        let keg = tmp.path().join("keg");
        let work = tmp.path().join("work");
        fs::create_dir_all(&work).unwrap();

        let mut runner = StepRunner::new(&kitchen, &recipe, BuildMethod::Source, &keg);
        let steps = vec![
            Step::new("echo prefix=%(prefix)s flags='%(flags)s' opt=%(opt:zlib)s"),
            Step::new("echo make=$MAKEFLAGS mode=$DEMO_MODE name=$LARDER_NAME"),
            Step {
                serial: true,
                ..Step::new("echo serial=$MAKEFLAGS")
            },
        ];
        runner
            .run_all(StepPhase::Install, &steps, &work, &tmp.path().join("logs"))
            .unwrap();

        let log = runner.into_log();
        assert!(log.contains(&format!("prefix={}", keg.display())));
        assert!(log.contains("flags='--enable-a --enable-b'"));
        assert!(log.contains(&format!("opt={}", tmp.path().join("prefix/opt/zlib").display())));
        assert!(log.contains("make=-j2 mode=1.0-fast name=demo"));
        assert!(log.contains("serial=-j1"));
        assert!(tmp.path().join("logs/install-01.log").is_file());
    }

    #[test]
    fn test_flags_are_shell_quoted() {
        assert_eq!(shell_quote("--disable-smb"), "--disable-smb");
        assert_eq!(shell_quote("CFLAGS=-O2 -g"), "'CFLAGS=-O2 -g'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
        assert_eq!(shell_quote(""), "''");

        let tmp = TempDir::new().unwrap();
        let kitchen = kitchen(&tmp);
        let mut recipe = recipe("");
        recipe.flags = vec!["CFLAGS=-O2 -g".to_string(), "--with-x".to_string()];
        let work = tmp.path().join("work");
        fs::create_dir_all(&work).unwrap();

        let mut runner = StepRunner::new(&kitchen, &recipe, BuildMethod::Source, &tmp.path().join("keg"));
        let step = Step {
            expect_output: vec!["[CFLAGS=-O2 -g]".to_string(), "[--with-x]".to_string()],
            ..Step::new("printf '[%s]\\n' %(flags)s")
        };
        runner
            .run_all(StepPhase::Install, &[step], &work, &tmp.path().join("logs"))
            .unwrap();
    }

    #[test]
    fn test_failure_stops_remaining_steps() {
        let tmp = TempDir::new().unwrap();
        let kitchen = kitchen(&tmp);
        let recipe = recipe("");
        let work = tmp.path().join("work");
        fs::create_dir_all(&work).unwrap();

        let steps = vec![
            Step::new("touch first"),
            Step::new("echo broken >&2; exit 3"),
            Step::new("touch third"),
        ];
        let mut runner = StepRunner::new(&kitchen, &recipe, BuildMethod::Source, &work);
        let err = runner
            .run_all(StepPhase::Install, &steps, &work, &tmp.path().join("logs"))
            .unwrap_err();

        match err {
            Error::StepExecution { index, status, output, phase, .. } => {
                assert_eq!(index, 1);
                assert_eq!(status, Some(3));
                assert_eq!(phase, StepPhase::Install);
                assert!(output.contains("broken"));
            }
            other => panic!("expected step failure, got {:?}", other),
        }
        assert!(work.join("first").exists());
        assert!(!work.join("third").exists());
    }

    #[test]
    fn test_expected_status_and_output() {
        let tmp = TempDir::new().unwrap();
        let kitchen = kitchen(&tmp);
        let recipe = recipe("");
        let work = tmp.path().to_path_buf();

        let ok = Step {
            expect_status: 1,
            expect_output: vec!["demo %(version)s".to_string()],
            ..Step::new("echo demo 1.0; exit 1")
        };
        let missing = Step {
            expect_output: vec!["never printed".to_string()],
            ..Step::new("echo something else")
        };

        let mut runner = StepRunner::new(&kitchen, &recipe, BuildMethod::Source, &work);
        runner
            .run_all(StepPhase::Test, &[ok], &work, &work.join("logs"))
            .unwrap();
        let err = runner
            .run_all(StepPhase::Test, &[missing], &work, &work.join("logs"))
            .unwrap_err();
        assert!(err.to_string().contains("never printed"));
    }

    #[test]
    fn test_timeout_kills_step() {
        let tmp = TempDir::new().unwrap();
        let mut kitchen = kitchen(&tmp);
        kitchen.config.timeout = Duration::from_millis(200);
        let recipe = recipe("");
        let work = tmp.path().to_path_buf();

        let mut runner = StepRunner::new(&kitchen, &recipe, BuildMethod::Source, &work);
        let started = Instant::now();
        let err = runner
            .run_all(StepPhase::Install, &[Step::new("sleep 10")], &work, &work.join("logs"))
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(5));
        match err {
            Error::StepExecution { status, reason, .. } => {
                assert_eq!(status, None);
                assert!(reason.contains("timed out"));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[test]
    fn test_abort_before_next_step() {
        let tmp = TempDir::new().unwrap();
        let kitchen = kitchen(&tmp);
        let recipe = recipe("");
        let work = tmp.path().to_path_buf();
        let abort = AbortHandle::new();
        abort.abort();

        let mut runner =
            StepRunner::new(&kitchen, &recipe, BuildMethod::Source, &work).with_abort(&abort);
        let err = runner
            .run_all(StepPhase::Install, &[Step::new("touch ran")], &work, &work.join("logs"))
            .unwrap_err();
        assert!(matches!(err, Error::Aborted { .. }));
        assert!(!work.join("ran").exists());
    }
}
