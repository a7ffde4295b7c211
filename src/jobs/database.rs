//! Sea-ORM-backed bookkeeping for jobs: status, progress, and checkpoints.
//! This is purely ambient persistence for the job-running layer; it is not
//! the CWL job-store collaborator (`crate::collaborators::JobStore`), which
//! is an external dependency this crate never implements.

use sea_orm::entity::prelude::*;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Schema, Set};

use crate::jobs::error::{JobError, JobResult};
use crate::jobs::types::{JobId, JobStatus};

pub mod jobs {
	use super::*;

	#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
	#[sea_orm(table_name = "jobs")]
	pub struct Model {
		#[sea_orm(primary_key, auto_increment = false)]
		pub id: String,
		pub name: String,
		pub state: Vec<u8>,
		pub status: String,
		pub priority: i32,
		pub progress_percent: f32,
		pub parent_job_id: Option<String>,
		pub created_at: ChronoDateTimeUtc,
		pub started_at: Option<ChronoDateTimeUtc>,
		pub completed_at: Option<ChronoDateTimeUtc>,
		pub error_message: Option<String>,
	}

	#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
	pub enum Relation {}

	impl ActiveModelBehavior for ActiveModel {}
}

pub mod history {
	use super::*;

	#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
	#[sea_orm(table_name = "job_history")]
	pub struct Model {
		#[sea_orm(primary_key)]
		pub id: i32,
		pub job_id: String,
		pub status: String,
		pub recorded_at: ChronoDateTimeUtc,
	}

	#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
	pub enum Relation {}

	impl ActiveModelBehavior for ActiveModel {}
}

pub mod checkpoint {
	use super::*;

	#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
	#[sea_orm(table_name = "job_checkpoints")]
	pub struct Model {
		#[sea_orm(primary_key, auto_increment = false)]
		pub job_id: String,
		pub data: Vec<u8>,
		pub saved_at: ChronoDateTimeUtc,
	}

	#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
	pub enum Relation {}

	impl ActiveModelBehavior for ActiveModel {}
}

/// Opens (creating if necessary) the sqlite database backing job
/// bookkeeping and ensures its tables exist.
pub async fn init_database(path: &std::path::Path) -> JobResult<DatabaseConnection> {
	if let Some(parent) = path.parent() {
		tokio::fs::create_dir_all(parent).await?;
	}
	let url = format!("sqlite://{}?mode=rwc", path.display());
	let conn = Database::connect(&url).await?;

	let backend = conn.get_database_backend();
	let schema = Schema::new(backend);
	for stmt in [
		backend.build(&schema.create_table_from_entity(jobs::Entity).if_not_exists()),
		backend.build(&schema.create_table_from_entity(history::Entity).if_not_exists()),
		backend.build(
			&schema
				.create_table_from_entity(checkpoint::Entity)
				.if_not_exists(),
		),
	] {
		conn.execute(stmt).await?;
	}

	Ok(conn)
}

/// Thin repository over the job bookkeeping tables.
pub struct JobDb {
	conn: DatabaseConnection,
}

impl JobDb {
	pub fn new(conn: DatabaseConnection) -> Self {
		Self { conn }
	}

	pub async fn insert_job(
		&self,
		job_id: JobId,
		name: &str,
		state: Vec<u8>,
		priority: i32,
		parent_job_id: Option<JobId>,
	) -> JobResult<()> {
		let model = jobs::ActiveModel {
			id: Set(job_id.to_string()),
			name: Set(name.to_string()),
			state: Set(state),
			status: Set(JobStatus::Queued.to_string()),
			priority: Set(priority),
			progress_percent: Set(0.0),
			parent_job_id: Set(parent_job_id.map(|p| p.to_string())),
			created_at: Set(chrono::Utc::now()),
			started_at: Set(None),
			completed_at: Set(None),
			error_message: Set(None),
		};
		jobs::Entity::insert(model).exec(&self.conn).await?;
		Ok(())
	}

	pub async fn get_job(&self, job_id: JobId) -> JobResult<Option<jobs::Model>> {
		Ok(jobs::Entity::find_by_id(job_id.to_string())
			.one(&self.conn)
			.await?)
	}

	pub async fn get_queued_jobs(&self) -> JobResult<Vec<jobs::Model>> {
		use sea_orm::ColumnTrait;
		Ok(jobs::Entity::find()
			.filter(jobs::Column::Status.is_in([
				JobStatus::Queued.to_string(),
				JobStatus::Running.to_string(),
				JobStatus::Paused.to_string(),
			]))
			.all(&self.conn)
			.await?)
	}

	pub async fn update_status(&self, job_id: JobId, status: JobStatus) -> JobResult<()> {
		let Some(model) = self.get_job(job_id).await? else {
			return Err(JobError::NotFound(job_id.to_string()));
		};
		let mut active: jobs::ActiveModel = model.into();
		active.status = Set(status.to_string());
		if status == JobStatus::Running {
			active.started_at = Set(Some(chrono::Utc::now()));
		}
		if status.is_terminal() {
			active.completed_at = Set(Some(chrono::Utc::now()));
		}
		sea_orm::ActiveModelTrait::update(active, &self.conn).await?;
		Ok(())
	}

	pub async fn update_status_with_error(
		&self,
		job_id: JobId,
		status: JobStatus,
		error_message: String,
	) -> JobResult<()> {
		let Some(model) = self.get_job(job_id).await? else {
			return Err(JobError::NotFound(job_id.to_string()));
		};
		let mut active: jobs::ActiveModel = model.into();
		active.status = Set(status.to_string());
		active.error_message = Set(Some(error_message));
		active.completed_at = Set(Some(chrono::Utc::now()));
		sea_orm::ActiveModelTrait::update(active, &self.conn).await?;
		Ok(())
	}

	pub async fn update_progress(&self, job_id: JobId, percent: f32) -> JobResult<()> {
		let Some(model) = self.get_job(job_id).await? else {
			return Err(JobError::NotFound(job_id.to_string()));
		};
		let mut active: jobs::ActiveModel = model.into();
		active.progress_percent = Set(percent);
		sea_orm::ActiveModelTrait::update(active, &self.conn).await?;
		Ok(())
	}

	pub async fn cleanup_history(&self, older_than: chrono::Duration) -> JobResult<u64> {
		use sea_orm::ColumnTrait;
		let cutoff = chrono::Utc::now() - older_than;
		let result = history::Entity::delete_many()
			.filter(history::Column::RecordedAt.lt(cutoff))
			.exec(&self.conn)
			.await?;
		Ok(result.rows_affected)
	}
}

#[async_trait::async_trait]
impl crate::jobs::context::CheckpointHandler for JobDb {
	async fn save(&self, job_id: JobId, data: Vec<u8>) -> JobResult<()> {
		use sea_orm::sea_query::OnConflict;
		let model = checkpoint::ActiveModel {
			job_id: Set(job_id.to_string()),
			data: Set(data),
			saved_at: Set(chrono::Utc::now()),
		};
		checkpoint::Entity::insert(model)
			.on_conflict(
				OnConflict::column(checkpoint::Column::JobId)
					.update_columns([checkpoint::Column::Data, checkpoint::Column::SavedAt])
					.to_owned(),
			)
			.exec(&self.conn)
			.await?;
		Ok(())
	}

	async fn load(&self, job_id: JobId) -> JobResult<Option<Vec<u8>>> {
		Ok(checkpoint::Entity::find_by_id(job_id.to_string())
			.one(&self.conn)
			.await?
			.map(|m| m.data))
	}

	async fn delete(&self, job_id: JobId) -> JobResult<()> {
		checkpoint::Entity::delete_by_id(job_id.to_string())
			.exec(&self.conn)
			.await?;
		Ok(())
	}
}
