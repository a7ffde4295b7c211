//! Derive macro for automatic job registration.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Data, DataStruct, DeriveInput};

/// Derive macro for automatic job registration.
///
/// Generates the `inventory::submit!` registration and the `ErasedJob` impl
/// a job type needs to be dispatched and resumed generically.
///
/// ```ignore
/// #[derive(Job, Serialize, Deserialize)]
/// pub struct MyJob {
///     // job fields
/// }
///
/// impl JobHandler for MyJob {
///     // implementation
/// }
/// ```
#[proc_macro_derive(Job)]
pub fn derive_job(input: TokenStream) -> TokenStream {
	let input = parse_macro_input!(input as DeriveInput);
	let name = &input.ident;

	if !matches!(&input.data, Data::Struct(DataStruct { .. })) {
		return syn::Error::new_spanned(&input.ident, "Job can only be derived for structs")
			.to_compile_error()
			.into();
	}

	let expanded = quote! {
		inventory::submit! {
			crate::jobs::types::JobRegistration {
				name: <#name as crate::jobs::traits::Job>::NAME,
				schema_fn: <#name as crate::jobs::traits::Job>::schema,
				create_fn: |data| {
					let job: #name = serde_json::from_value(data)?;
					Ok(Box::new(job) as Box<dyn crate::jobs::types::ErasedJob>)
				},
				deserialize_fn: |data| {
					let job: #name = rmp_serde::from_slice(data)?;
					Ok(Box::new(job) as Box<dyn crate::jobs::types::ErasedJob>)
				},
			}
		}

		impl crate::jobs::types::ErasedJob for #name {
			fn create_executor(
				self: Box<Self>,
				job_id: crate::jobs::types::JobId,
				job_db: std::sync::Arc<crate::jobs::database::JobDb>,
				status_tx: tokio::sync::watch::Sender<crate::jobs::types::JobStatus>,
				progress_tx: tokio::sync::mpsc::UnboundedSender<crate::jobs::progress::Progress>,
				broadcast_tx: tokio::sync::broadcast::Sender<crate::jobs::progress::Progress>,
				checkpoint_handler: std::sync::Arc<dyn crate::jobs::context::CheckpointHandler>,
				collaborators: crate::jobs::context::JobCollaborators,
			) -> (
				Box<dyn dispatch_system::Task<crate::jobs::error::JobError>>,
				std::sync::Arc<tokio::sync::Mutex<Option<crate::jobs::output::JobOutput>>>,
			) {
				let output = std::sync::Arc::new(tokio::sync::Mutex::new(None));
				let executor = Box::new(crate::jobs::executor::JobExecutor::new(
					*self,
					job_id,
					job_db,
					status_tx,
					progress_tx,
					broadcast_tx,
					checkpoint_handler,
					collaborators,
					output.clone(),
				));
				(executor, output)
			}

			fn serialize_state(&self) -> Result<Vec<u8>, crate::jobs::error::JobError> {
				rmp_serde::to_vec(self)
					.map_err(|e| crate::jobs::error::JobError::serialization(format!("{}", e)))
			}
		}
	};

	TokenStream::from(expanded)
}
