// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use imgsift::convert::{Converter, ImageConverter, TargetFormat};
use imgsift::discovery::WorkQueue;
use imgsift::pipeline::{Pipeline, PipelineSettings};
use imgsift::readiness::ReadinessGate;
use imgsift::{Error, HashAlgorithm, RecordStore, Result, RetryPolicy};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Scratch layout for one test: input, output and database under one TempDir
pub struct TestEnv {
    pub dir: TempDir,
    pub input: PathBuf,
    pub output: PathBuf,
    pub db_path: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("incoming");
        let output = dir.path().join("converted");
        std::fs::create_dir_all(&input).unwrap();

        Self {
            db_path: dir.path().join("records.db"),
            dir,
            input,
            output,
        }
    }

    pub fn store(&self, pool_size: usize) -> RecordStore {
        RecordStore::connect(
            &self.db_path,
            pool_size,
            Duration::from_secs(10),
            RetryPolicy {
                max_attempts: 10,
                base_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(100),
            },
        )
        .unwrap()
    }

    /// Pipeline with a short quiescence interval and the real image converter
    pub fn pipeline(&self, delete_originals: bool) -> Arc<Pipeline> {
        self.pipeline_with(Arc::new(ImageConverter::new(TargetFormat::Webp)), delete_originals)
    }

    pub fn pipeline_with(
        &self,
        converter: Arc<dyn Converter>,
        delete_originals: bool,
    ) -> Arc<Pipeline> {
        self.pipeline_on(self.store(4), converter, delete_originals)
    }

    /// Pipeline over a caller-built store
    pub fn pipeline_on(
        &self,
        store: RecordStore,
        converter: Arc<dyn Converter>,
        delete_originals: bool,
    ) -> Arc<Pipeline> {
        let settings = PipelineSettings {
            gate: ReadinessGate::new(Duration::from_millis(10), 5),
            algorithm: HashAlgorithm::Sha256,
            chunk_size: 4096,
            output_dir: self.output.clone(),
            delete_originals,
        };
        Arc::new(Pipeline::new(
            store,
            converter,
            Arc::new(WorkQueue::new()),
            settings,
        ))
    }

    /// Write a small PNG whose pixels are derived from `seed`
    pub fn write_png(&self, name: &str, seed: u8) -> PathBuf {
        let path = self.input.join(name);
        std::fs::write(&path, png_bytes(seed)).unwrap();
        path
    }

    pub fn output_files(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(&self.output) {
            Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
            Err(_) => Vec::new(),
        }
    }
}

pub fn png_bytes(seed: u8) -> Vec<u8> {
    let img = RgbImage::from_fn(8, 8, |x, y| {
        Rgb([seed, (x as u8).wrapping_mul(31), (y as u8).wrapping_add(seed)])
    });
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .unwrap();
    out
}

/// Converter that always fails, for exercising the failure path
pub struct FailingConverter;

impl Converter for FailingConverter {
    fn target_extension(&self) -> &str {
        "webp"
    }

    fn convert(&self, source: &Path, _data: &[u8]) -> Result<Vec<u8>> {
        Err(Error::Conversion {
            path: source.to_path_buf(),
            reason: "unsupported content".to_string(),
        })
    }
}
