//! Lazy value resolution: promises into producing jobs' results, with
//! link-merge and pick-value applied before a value crosses a step
//! boundary. Plain structures, not opaque deferred objects — per-step
//! `valueFrom` expressions are the only part that needs the expression
//! evaluator collaborator, and only in a second pass.

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;

use crate::collaborators::{CollaboratorError, ExpressionEvaluator, FilesystemAccess};
use crate::cwl::model::{CwlValue, StepPromise};
use crate::jobs::types::JobId;

#[derive(Debug, Error)]
pub enum ResolveError {
	#[error("pickValue first_non_null: no non-null value in {0:?}")]
	NoNonNullValue(Vec<String>),

	#[error("pickValue the_only_non_null: multiple non-null values")]
	MultipleNonNullValues,

	#[error("no recorded result for source {0:?}")]
	MissingProducerResult(String),

	#[error(transparent)]
	Json(#[from] serde_json::Error),

	#[error(transparent)]
	Collaborator(#[from] CollaboratorError),
}

/// `results[job][output_key]` for every job that has finished so far.
pub type ResultsMap = HashMap<JobId, HashMap<String, CwlValue>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum LinkMerge {
	MergeNested,
	MergeFlattened,
}

impl Default for LinkMerge {
	fn default() -> Self {
		LinkMerge::MergeNested
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PickValue {
	FirstNonNull,
	TheOnlyNonNull,
	AllNonNull,
}

/// One or many `(sourceName, producingJob)` references, plus how to combine
/// them if there is more than one.
#[derive(Debug, Clone)]
pub struct ResolveSource {
	pub sources: Vec<StepPromise>,
	pub link_merge: LinkMerge,
	pub pick_value: Option<PickValue>,
}

impl ResolveSource {
	pub fn single(promise: StepPromise) -> Self {
		Self {
			sources: vec![promise],
			link_merge: LinkMerge::default(),
			pick_value: None,
		}
	}

	pub fn resolve(&self, results: &ResultsMap) -> Result<CwlValue, ResolveError> {
		let mut value = if self.sources.len() == 1 {
			lookup(results, &self.sources[0])?
		} else {
			let merged: Result<Vec<CwlValue>, ResolveError> =
				self.sources.iter().map(|s| lookup(results, s)).collect();
			apply_link_merge(self.link_merge, merged?)
		};

		if let Some(pick) = self.pick_value {
			value = apply_pick_value(pick, value, &self.sources)?;
		}

		Ok(filter_skip_null(value))
	}
}

fn lookup(results: &ResultsMap, promise: &StepPromise) -> Result<CwlValue, ResolveError> {
	results
		.get(&promise.producer)
		.and_then(|record| record.get(&promise.output_key))
		.cloned()
		.ok_or_else(|| ResolveError::MissingProducerResult(promise.output_key.clone()))
}

/// `merge_nested` keeps one list entry per source as-is; `merge_flattened`
/// concatenates any entry that is itself a list, one level deep.
pub fn apply_link_merge(mode: LinkMerge, values: Vec<CwlValue>) -> CwlValue {
	match mode {
		LinkMerge::MergeNested => CwlValue::Array(values),
		LinkMerge::MergeFlattened => {
			let mut flat = Vec::with_capacity(values.len());
			for value in values {
				match value {
					CwlValue::Array(inner) => flat.extend(inner),
					other => flat.push(other),
				}
			}
			CwlValue::Array(flat)
		}
	}
}

pub fn apply_pick_value(
	mode: PickValue,
	value: CwlValue,
	sources: &[StepPromise],
) -> Result<CwlValue, ResolveError> {
	let items = match value {
		CwlValue::Array(items) => items,
		other => vec![other],
	};
	match mode {
		PickValue::FirstNonNull => items
			.into_iter()
			.find(|v| !v.is_null_or_skip())
			.ok_or_else(|| {
				ResolveError::NoNonNullValue(sources.iter().map(|s| s.output_key.clone()).collect())
			}),
		PickValue::TheOnlyNonNull => {
			let mut non_null = items.into_iter().filter(|v| !v.is_null_or_skip());
			let first = non_null.next().ok_or_else(|| {
				ResolveError::NoNonNullValue(sources.iter().map(|s| s.output_key.clone()).collect())
			})?;
			if non_null.next().is_some() {
				return Err(ResolveError::MultipleNonNullValues);
			}
			Ok(first)
		}
		PickValue::AllNonNull => Ok(CwlValue::Array(
			items.into_iter().filter(|v| !v.is_null_or_skip()).collect(),
		)),
	}
}

/// Replaces every `Skip` sentinel, at any depth, with `Null`. A pure
/// function: the return value is authoritative, nothing is mutated in
/// place.
pub fn filter_skip_null(value: CwlValue) -> CwlValue {
	match value {
		CwlValue::Skip => CwlValue::Null,
		CwlValue::Array(items) => CwlValue::Array(items.into_iter().map(filter_skip_null).collect()),
		CwlValue::Record(fields) => CwlValue::Record(
			fields
				.into_iter()
				.map(|(k, v)| (k, filter_skip_null(v)))
				.collect(),
		),
		other => other,
	}
}

const LOAD_CONTENTS_LIMIT: usize = 64 * 1024;

/// Wraps a source plus a `valueFrom` expression. `resolve()` yields the
/// source's own value, used as the expression's `self` context; `do_eval`
/// evaluates the expression itself once every sibling input is resolved.
#[derive(Debug, Clone)]
pub struct StepValueFrom {
	pub source: ResolveSource,
	pub expression: String,
	pub load_contents: bool,
}

impl StepValueFrom {
	pub fn resolve(&self, results: &ResultsMap) -> Result<CwlValue, ResolveError> {
		self.source.resolve(results)
	}

	pub async fn do_eval(
		&self,
		evaluator: &dyn ExpressionEvaluator,
		filesystem: &dyn FilesystemAccess,
		self_value: &CwlValue,
		sibling_inputs: &serde_json::Value,
	) -> Result<CwlValue, ResolveError> {
		let mut self_value = self_value.clone();
		if self.load_contents {
			load_contents_if_file(filesystem, &mut self_value).await?;
		}
		let self_json = serde_json::to_value(&self_value)?;
		let result = evaluator
			.eval(&self.expression, sibling_inputs, &serde_json::Value::Null, Some(&self_json))
			.await?;
		Ok(serde_json::from_value(result)?)
	}
}

async fn load_contents_if_file(
	filesystem: &dyn FilesystemAccess,
	value: &mut CwlValue,
) -> Result<(), ResolveError> {
	if let CwlValue::File(file) = value {
		let bytes = filesystem.open_read(&file.location).await?;
		let head = &bytes[..bytes.len().min(LOAD_CONTENTS_LIMIT)];
		file.contents = Some(String::from_utf8_lossy(head).into_owned());
	}
	Ok(())
}

/// If the source resolves to non-null, use it; else the default.
#[derive(Debug, Clone)]
pub struct DefaultWithSource {
	pub source: ResolveSource,
	pub default: CwlValue,
}

impl DefaultWithSource {
	pub fn resolve(&self, results: &ResultsMap) -> Result<CwlValue, ResolveError> {
		let value = self.source.resolve(results)?;
		if value.is_null_or_skip() {
			Ok(self.default.clone())
		} else {
			Ok(value)
		}
	}
}

/// A constant value with no source at all.
#[derive(Debug, Clone)]
pub struct JustAValue(pub CwlValue);

impl JustAValue {
	pub fn resolve(&self) -> CwlValue {
		self.0.clone()
	}
}

/// The four resolver primitives, unified so a step's input dict can hold a
/// mix of them.
#[derive(Debug, Clone)]
pub enum InputBinding {
	Source(ResolveSource),
	StepValueFrom(StepValueFrom),
	Default(DefaultWithSource),
	Value(JustAValue),
}

impl InputBinding {
	pub fn resolve(&self, results: &ResultsMap) -> Result<CwlValue, ResolveError> {
		match self {
			InputBinding::Source(s) => s.resolve(results),
			InputBinding::StepValueFrom(s) => s.resolve(results),
			InputBinding::Default(s) => s.resolve(results),
			InputBinding::Value(s) => Ok(s.resolve()),
		}
	}
}

/// Resolves a dict of input bindings in two passes: first every entry's
/// `resolve()`, yielding a plain dictionary; second, every `StepValueFrom`
/// entry's expression is evaluated against that dictionary.
pub async fn resolve_bindings(
	bindings: &BTreeMap<String, InputBinding>,
	results: &ResultsMap,
	evaluator: &dyn ExpressionEvaluator,
	filesystem: &dyn FilesystemAccess,
) -> Result<BTreeMap<String, CwlValue>, ResolveError> {
	let mut resolved = BTreeMap::new();
	for (key, binding) in bindings {
		resolved.insert(key.clone(), binding.resolve(results)?);
	}

	let sibling_json = serde_json::to_value(&resolved)?;
	let mut out = resolved.clone();
	for (key, binding) in bindings {
		if let InputBinding::StepValueFrom(svf) = binding {
			let self_value = resolved.get(key).cloned().unwrap_or(CwlValue::Null);
			let evaluated = svf
				.do_eval(evaluator, filesystem, &self_value, &sibling_json)
				.await?;
			out.insert(key.clone(), evaluated);
		}
	}
	Ok(out)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn promise(job: JobId, key: &str) -> StepPromise {
		StepPromise {
			producer: job,
			output_key: key.to_string(),
		}
	}

	fn int(n: i64) -> CwlValue {
		CwlValue::Int(n)
	}

	#[test]
	fn merge_flattened_concatenates_one_level() {
		let values = vec![
			CwlValue::Array(vec![int(1), int(2)]),
			CwlValue::Array(vec![int(3)]),
			CwlValue::Array(vec![int(4), int(5)]),
		];
		let merged = apply_link_merge(LinkMerge::MergeFlattened, values);
		assert_eq!(merged, CwlValue::Array(vec![int(1), int(2), int(3), int(4), int(5)]));
	}

	#[test]
	fn merge_nested_keeps_the_lists_as_entries() {
		let values = vec![
			CwlValue::Array(vec![int(1), int(2)]),
			CwlValue::Array(vec![int(3)]),
			CwlValue::Array(vec![int(4), int(5)]),
		];
		let merged = apply_link_merge(LinkMerge::MergeNested, values.clone());
		assert_eq!(merged, CwlValue::Array(values));
	}

	#[test]
	fn pick_value_examples_from_spec() {
		let sources = vec![];
		let first = apply_pick_value(
			PickValue::FirstNonNull,
			CwlValue::Array(vec![CwlValue::Null, int(7), int(8)]),
			&sources,
		)
		.unwrap();
		assert_eq!(first, int(7));

		let only = apply_pick_value(
			PickValue::TheOnlyNonNull,
			CwlValue::Array(vec![CwlValue::Null, int(7), CwlValue::Null]),
			&sources,
		)
		.unwrap();
		assert_eq!(only, int(7));

		let err = apply_pick_value(
			PickValue::TheOnlyNonNull,
			CwlValue::Array(vec![int(7), int(8)]),
			&sources,
		);
		assert!(matches!(err, Err(ResolveError::MultipleNonNullValues)));

		let all = apply_pick_value(
			PickValue::AllNonNull,
			CwlValue::Array(vec![CwlValue::Null, int(7), int(8)]),
			&sources,
		)
		.unwrap();
		assert_eq!(all, CwlValue::Array(vec![int(7), int(8)]));
	}

	#[test]
	fn skip_is_filtered_to_null_at_every_depth() {
		let value = CwlValue::Array(vec![CwlValue::Skip, int(1)]);
		assert_eq!(filter_skip_null(value), CwlValue::Array(vec![CwlValue::Null, int(1)]));
	}

	#[test]
	fn all_non_null_over_all_skips_is_empty() {
		let sources = vec![];
		let value = filter_skip_null(CwlValue::Array(vec![CwlValue::Skip, CwlValue::Skip]));
		let picked = apply_pick_value(PickValue::AllNonNull, value, &sources).unwrap();
		assert_eq!(picked, CwlValue::Array(vec![]));
	}

	#[test]
	fn resolving_a_dict_with_no_step_value_from_is_idempotent() {
		let job = JobId::new();
		let mut results = ResultsMap::new();
		results.insert(job, HashMap::from([("out".to_string(), int(42))]));

		let mut bindings = BTreeMap::new();
		bindings.insert(
			"x".to_string(),
			InputBinding::Source(ResolveSource::single(promise(job, "out"))),
		);

		let a = bindings
			.get("x")
			.unwrap()
			.resolve(&results)
			.unwrap();
		let b = bindings.get("x").unwrap().resolve(&results).unwrap();
		assert_eq!(a, b);
		assert_eq!(a, int(42));
	}
}
