//! Annotation sink that records everything it is given

#![allow(dead_code)]

use async_trait::async_trait;
use merge_assist::annotate::{Annotation, AnnotationSink};
use merge_assist::error::{Error, Result};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Records annotations; can be told to fail delivery
#[derive(Default)]
pub struct RecordingSink {
    annotations: Mutex<Vec<Annotation>>,
    failing: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every delivery fail (the annotation is still recorded)
    pub fn fail_delivery(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    /// All annotations, in order
    pub fn annotations(&self) -> Vec<Annotation> {
        self.annotations.lock().unwrap().clone()
    }

    /// Annotation kinds emitted for `iid`, in order
    pub fn kinds_for(&self, iid: u64) -> Vec<&'static str> {
        self.annotations()
            .iter()
            .filter(|a| a.iid() == iid)
            .map(Annotation::kind)
            .collect()
    }

    /// Number of annotations of `kind` for `iid`
    pub fn count(&self, iid: u64, kind: &str) -> usize {
        self.kinds_for(iid).iter().filter(|k| **k == kind).count()
    }
}

#[async_trait]
impl AnnotationSink for RecordingSink {
    async fn annotate(&self, annotation: &Annotation) -> Result<()> {
        self.annotations.lock().unwrap().push(annotation.clone());
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Platform("sink unavailable".to_string()));
        }
        Ok(())
    }
}
