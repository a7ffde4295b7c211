//! SLURM backend: builds `sbatch`/`squeue`/`scancel` command lines from a
//! [`JobSubmission`]. The actual process invocation is delegated to an
//! injected [`CommandRunner`] so this module stays testable without a real
//! cluster, and so a caller can swap in an SSH-wrapped runner for a remote
//! head node.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::backend::{BatchSystemBackend, ExternalBatchId, JobExitStatus, JobSubmission};
use crate::error::BackendError;

/// Runs a prepared command line and returns its captured stdout, or an error
/// carrying stderr. Transient vs. fatal classification is the runner's call.
#[async_trait]
pub trait CommandRunner: Send + Sync + 'static {
	async fn run(&self, command: &[String]) -> Result<String, BackendError>;
}

pub struct SlurmBackend<R: CommandRunner> {
	runner: R,
	partition: Option<String>,
}

impl<R: CommandRunner> SlurmBackend<R> {
	pub fn new(runner: R, partition: Option<String>) -> Self {
		Self { runner, partition }
	}
}

#[async_trait]
impl<R: CommandRunner> BatchSystemBackend for SlurmBackend<R> {
	fn name(&self) -> &str {
		"slurm"
	}

	async fn prepare_submission(&self, job: &JobSubmission) -> Result<Vec<String>, BackendError> {
		let mut cmd = vec!["sbatch".to_string(), "--parsable".to_string()];

		cmd.push("--job-name".into());
		cmd.push(job.display_name.clone());

		cmd.push("--cpus-per-task".into());
		cmd.push(job.cores.ceil().max(1.0).to_string());

		let mem_mib = (job.memory_bytes / (1024 * 1024)).max(1);
		cmd.push("--mem".into());
		cmd.push(format!("{mem_mib}M"));

		if let Some(partition) = &self.partition {
			cmd.push("--partition".into());
			cmd.push(partition.clone());
		}

		for accel in &job.accelerators {
			cmd.push("--gres".into());
			cmd.push(format!("{}:{}", accel.kind, accel.count));
		}

		if job.preemptible {
			cmd.push("--qos".into());
			cmd.push("preemptible".into());
		}

		for (key, value) in &job.environment {
			cmd.push("--export".into());
			cmd.push(format!("{key}={value}"));
		}

		cmd.push("--wrap".into());
		cmd.push(shell_join(&job.command));

		Ok(cmd)
	}

	async fn submit_job(&self, command: Vec<String>) -> Result<ExternalBatchId, BackendError> {
		let output = self.runner.run(&command).await?;
		let job_id = output
			.trim()
			.split(';')
			.next()
			.filter(|s| !s.is_empty())
			.ok_or_else(|| BackendError::Fatal(format!("unparseable sbatch output: {output:?}")))?;
		Ok(ExternalBatchId(job_id.to_string()))
	}

	async fn kill_job(&self, id: &ExternalBatchId) -> Result<(), BackendError> {
		self.runner
			.run(&["scancel".to_string(), id.0.clone()])
			.await
			.map(|_| ())
	}

	async fn get_running_job_ids(&self) -> Result<HashSet<ExternalBatchId>, BackendError> {
		let output = self
			.runner
			.run(&[
				"squeue".to_string(),
				"--noheader".to_string(),
				"--format=%i".to_string(),
			])
			.await?;
		Ok(output.lines().map(|l| ExternalBatchId(l.trim().to_string())).collect())
	}

	async fn get_job_exit_code(
		&self,
		id: &ExternalBatchId,
	) -> Result<Option<JobExitStatus>, BackendError> {
		let output = self
			.runner
			.run(&[
				"sacct".to_string(),
				"-j".to_string(),
				id.0.clone(),
				"--format=ExitCode,State".to_string(),
				"--noheader".to_string(),
				"--parsable2".to_string(),
			])
			.await?;

		let Some(first_line) = output.lines().next() else {
			return Ok(None);
		};
		let mut fields = first_line.split('|');
		let exit_code_field = fields.next().unwrap_or("");
		let state = fields.next().unwrap_or("").trim();

		match state {
			"" | "PENDING" | "RUNNING" | "COMPLETING" => Ok(None),
			"CANCELLED" => Ok(Some(JobExitStatus::Reason(crate::backend::ExitReason::Killed))),
			"NODE_FAIL" | "OUT_OF_MEMORY" => {
				Ok(Some(JobExitStatus::Reason(crate::backend::ExitReason::MemoryLimitExceeded)))
			}
			_ => {
				let code = exit_code_field
					.split(':')
					.next()
					.and_then(|s| s.parse::<i32>().ok())
					.unwrap_or(-1);
				Ok(Some(JobExitStatus::Code(code)))
			}
		}
	}
}

fn shell_join(command: &[String]) -> String {
	command
		.iter()
		.map(|part| shell_quote(part))
		.collect::<Vec<_>>()
		.join(" ")
}

fn shell_quote(part: &str) -> String {
	if part.chars().all(|c| c.is_alphanumeric() || "_-./=".contains(c)) {
		part.to_string()
	} else {
		format!("'{}'", part.replace('\'', r"'\''"))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Mutex;

	struct FakeRunner {
		responses: Mutex<std::collections::VecDeque<Result<String, BackendError>>>,
	}

	#[async_trait]
	impl CommandRunner for FakeRunner {
		async fn run(&self, _command: &[String]) -> Result<String, BackendError> {
			self.responses
				.lock()
				.unwrap()
				.pop_front()
				.unwrap_or_else(|| Ok(String::new()))
		}
	}

	#[tokio::test]
	async fn prepare_submission_includes_resources_and_gpu_gres() {
		let runner = FakeRunner {
			responses: Mutex::new(Default::default()),
		};
		let backend = SlurmBackend::new(runner, Some("gpu".into()));
		let job = JobSubmission {
			id: 1,
			cores: 4.0,
			memory_bytes: 8 * 1024 * 1024 * 1024,
			disk_bytes: 0,
			command: vec!["echo".into(), "hello world".into()],
			display_name: "my-tool".into(),
			environment: Default::default(),
			accelerators: vec![crate::backend::AcceleratorRequirement {
				kind: "gpu".into(),
				api: Some("cuda".into()),
				count: 2,
			}],
			preemptible: false,
		};

		let cmd = backend.prepare_submission(&job).await.unwrap();
		assert!(cmd.contains(&"--partition".to_string()));
		assert!(cmd.iter().any(|a| a == "4"));
		assert!(cmd.iter().any(|a| a == "8192M"));
		assert!(cmd.iter().any(|a| a == "gpu:2"));
		assert!(cmd.iter().any(|a| a.contains("hello world")));
	}

	#[tokio::test]
	async fn submit_job_parses_parsable_job_id() {
		let runner = FakeRunner {
			responses: Mutex::new(vec![Ok("12345;gpu".to_string())].into()),
		};
		let backend = SlurmBackend::new(runner, None);
		let id = backend.submit_job(vec!["sbatch".into()]).await.unwrap();
		assert_eq!(id.0, "12345");
	}
}
