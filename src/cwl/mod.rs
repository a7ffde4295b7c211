//! CWL workflow execution core: the data model, URI/path schemes, file
//! staging, path mapping, value resolution, workflow translation, and tool
//! execution that together make up this crate's domain logic.

pub mod model;
pub mod path_mapper;
pub mod resolve;
pub mod staging;
pub mod tool_job;
pub mod translator;
pub mod uri;

pub use model::{CwlDirectory, CwlFile, CwlValue, FileId, StepPromise, TranslatorState};
pub use path_mapper::{MapperEntry, PathMapper, PathMapperError, PathType};
pub use resolve::{
	apply_link_merge, apply_pick_value, filter_skip_null, resolve_bindings, DefaultWithSource,
	InputBinding, JustAValue, LinkMerge, PickValue, ResolveError, ResolveSource, ResultsMap,
	StepValueFrom,
};
pub use staging::{ImportMaps, ImportOptions, StagingError};
pub use tool_job::{JobWrapper, ResolvedResources, ResourceExpressions, ToolJob, ToolJobError, ToolJobOutput};
pub use translator::{
	run_workflow, ScatterMethod, StepDecl, StepInputDecl, ToolKind, TranslatorError, Workflow,
	WorkflowOutputDecl,
};
pub use uri::{check_directory_invariants, decode_directory, encode_directory, ensure_no_collisions, DirEntry, DirectoryContents, UriError};
