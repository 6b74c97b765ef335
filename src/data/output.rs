use crate::data::sample::Sample;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

const SAMPLE_ID_PLACEHOLDER: &str = "{sample.id}";
const DEFAULT_CHECKPOINT: &str = "main";

/// Declarative description of files to copy from a runner's workdir into the
/// result directory.
///
/// The source may contain `{sample.id}` placeholders and glob metacharacters.
/// Resolution happens when the runner returns, against the runner's workdir.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutputSpec {
    src: String,
    dst_dir: Option<PathBuf>,
    dst_name: Option<String>,
    checkpoint: String,
    optional: bool,
}

impl OutputSpec {
    pub fn new(src: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            dst_dir: None,
            dst_name: None,
            checkpoint: DEFAULT_CHECKPOINT.to_string(),
            optional: false,
        }
    }

    /// Destination directory relative to the result directory.
    pub fn dst_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dst_dir = Some(dir.into());
        self
    }

    /// Renames the copied file. Ignored with a warning when the source
    /// pattern matches more than one file.
    pub fn dst_name(mut self, name: impl Into<String>) -> Self {
        self.dst_name = Some(name.into());
        self
    }

    /// Binds the output to a checkpoint label (default `"main"`).
    pub fn checkpoint(mut self, label: impl Into<String>) -> Self {
        self.checkpoint = label.into();
        self
    }

    /// Suppresses the zero-match warning for this pattern.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn src(&self) -> &str {
        &self.src
    }

    pub fn checkpoint_label(&self) -> &str {
        &self.checkpoint
    }

    /// Resolves the pattern to concrete copy operations.
    ///
    /// Placeholders are substituted per non-failed sample, globs expand
    /// relative to `workdir`, and destinations are constructed under
    /// `resultdir` following the declared `dst_dir`/`dst_name`, falling back
    /// to the source path relative to the workdir.
    pub fn resolve(&self, samples: &[Sample], workdir: &Path, resultdir: &Path) -> Resolution {
        let mut resolution = Resolution::default();
        let mut seen = BTreeSet::new();

        for context in self.contexts(samples) {
            let pattern = if Path::new(&context.src).is_absolute() {
                context.src.clone()
            } else {
                workdir.join(&context.src).to_string_lossy().into_owned()
            };

            let matches = match expand_glob(&pattern) {
                Ok(matches) => matches,
                Err(error) => {
                    resolution
                        .warnings
                        .push(format!("Failed to resolve output '{}': {error}", self.src));
                    continue;
                }
            };

            if matches.is_empty() {
                if !self.optional {
                    resolution
                        .warnings
                        .push(format!("No files matched pattern '{pattern}'"));
                }
                continue;
            }

            let multiple = matches.len() > 1;
            if multiple && self.dst_name.is_some() {
                resolution.warnings.push(format!(
                    "Destination name will be ignored as '{}' matched multiple files",
                    self.src
                ));
            }

            for src in matches {
                let base = match &context.dst_dir {
                    Some(dir) if dir.is_absolute() => dir.clone(),
                    Some(dir) => resultdir.join(dir),
                    None => resultdir.to_path_buf(),
                };
                let basename = |base: &PathBuf| match src.file_name() {
                    Some(name) => base.join(name),
                    None => base.clone(),
                };
                let dst = match (&context.dst_name, multiple) {
                    (Some(name), false) => base.join(name),
                    // A dropped rename and an explicit dst_dir both keep the
                    // basename; only the bare case mirrors the relative path.
                    (Some(_), true) => basename(&base),
                    (None, _) if context.dst_dir.is_some() => basename(&base),
                    (None, _) => match src.strip_prefix(workdir) {
                        Ok(relative) => resultdir.join(relative),
                        Err(_) => basename(&resultdir.to_path_buf()),
                    },
                };

                if seen.insert((src.clone(), dst.clone())) {
                    resolution.outputs.push(Output {
                        src,
                        dst,
                        checkpoint: self.checkpoint.clone(),
                    });
                }
            }
        }

        resolution
    }

    /// Expands only the source side of the pattern, for checkpoint tracking.
    pub fn expand_sources(&self, samples: &[Sample], workdir: &Path) -> BTreeSet<PathBuf> {
        let mut sources = BTreeSet::new();
        for context in self.contexts(samples) {
            let pattern = if Path::new(&context.src).is_absolute() {
                context.src.clone()
            } else {
                workdir.join(&context.src).to_string_lossy().into_owned()
            };
            if let Ok(matches) = expand_glob(&pattern) {
                sources.extend(matches);
            }
        }
        sources
    }

    /// One resolution context per substituted sample, or a single context when
    /// no placeholder is present. Duplicate substitutions collapse.
    fn contexts(&self, samples: &[Sample]) -> Vec<SubstitutionContext> {
        let uses_placeholder = self.src.contains(SAMPLE_ID_PLACEHOLDER)
            || self
                .dst_dir
                .as_ref()
                .is_some_and(|d| d.to_string_lossy().contains(SAMPLE_ID_PLACEHOLDER))
            || self
                .dst_name
                .as_ref()
                .is_some_and(|n| n.contains(SAMPLE_ID_PLACEHOLDER));

        if !uses_placeholder {
            return vec![SubstitutionContext {
                src: self.src.clone(),
                dst_dir: self.dst_dir.clone(),
                dst_name: self.dst_name.clone(),
            }];
        }

        let mut contexts = Vec::new();
        let mut seen = BTreeSet::new();
        for sample in samples.iter().filter(|s| !s.is_failed()) {
            let context = SubstitutionContext {
                src: substitute(&self.src, &sample.id),
                dst_dir: self
                    .dst_dir
                    .as_ref()
                    .map(|d| PathBuf::from(substitute(&d.to_string_lossy(), &sample.id))),
                dst_name: self.dst_name.as_ref().map(|n| substitute(n, &sample.id)),
            };
            let key = (
                context.src.clone(),
                context.dst_dir.clone(),
                context.dst_name.clone(),
            );
            if seen.insert(key) {
                contexts.push(context);
            }
        }
        contexts
    }
}

struct SubstitutionContext {
    src: String,
    dst_dir: Option<PathBuf>,
    dst_name: Option<String>,
}

fn substitute(template: &str, sample_id: &str) -> String {
    template.replace(SAMPLE_ID_PLACEHOLDER, sample_id)
}

fn expand_glob(pattern: &str) -> Result<Vec<PathBuf>, glob::PatternError> {
    Ok(glob::glob(pattern)?.filter_map(Result::ok).collect())
}

/// A concrete copy operation produced by [`OutputSpec::resolve`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Output {
    pub src: PathBuf,
    pub dst: PathBuf,
    pub checkpoint: String,
}

/// The outcome of resolving one spec: copy operations in match order plus
/// warnings to surface to the user.
#[derive(Debug, Default)]
pub struct Resolution {
    pub outputs: Vec<Output>,
    pub warnings: Vec<String>,
}
