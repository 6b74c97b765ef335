pub mod collection;
pub mod merge;
pub mod output;
pub mod sample;

pub use collection::SampleCollection;
pub use merge::{default_merge, AttrScope, MergeFn, Merger};
pub use output::{Output, OutputSpec, Resolution};
pub use sample::{AttrBag, Sample, SampleState};
