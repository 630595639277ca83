// THEORY:
// Segmenting one image is sequential, but images are independent of each other. The
// `ParallelPipeline` exploits that: a dispatcher hands images round-robin to a fixed
// set of workers, and each worker runs the CPU-bound segmentation on tokio's blocking
// pool so the async runtime stays responsive. Results come back over oneshot
// channels, and a batch is returned in input order no matter which worker finished
// first.
//
// Every worker shares one immutable `PillPipeline` behind an `Arc`; no working
// buffer is shared between images. Each image moves into its task and comes back
// with its segmentation, so callers never hold a second copy while a batch runs.

use crate::error::{Result, SegmentationError};
use crate::pipeline::{PillPipeline, PipelineConfig, Segmentation};
use futures::future::join_all;
use image::RgbImage;
use log::debug;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// An image handed back together with its segmentation.
#[derive(Debug, Clone)]
pub struct Segmented {
    pub image: RgbImage,
    pub segmentation: Segmentation,
}

pub struct SegmentTask {
    pub image_id: u64,
    pub image: RgbImage,
    pub result_sender: oneshot::Sender<Result<Segmented>>,
}

pub struct WorkerPool {
    task_sender: mpsc::UnboundedSender<SegmentTask>,
    workers: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(pipeline: Arc<PillPipeline>, worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let (task_sender, mut task_receiver) = mpsc::unbounded_channel::<SegmentTask>();
        let mut workers = Vec::with_capacity(worker_count);

        let (worker_senders, worker_receivers): (Vec<_>, Vec<_>) = (0..worker_count)
            .map(|_| mpsc::unbounded_channel::<SegmentTask>())
            .unzip();

        // Spawn dispatcher
        tokio::spawn(async move {
            let mut worker_idx = 0;
            while let Some(task) = task_receiver.recv().await {
                let _ = worker_senders[worker_idx].send(task);
                worker_idx = (worker_idx + 1) % worker_count;
            }
        });

        // Spawn workers
        for mut worker_receiver in worker_receivers {
            let worker_pipeline = Arc::clone(&pipeline);
            let worker = tokio::spawn(async move {
                while let Some(task) = worker_receiver.recv().await {
                    let pipeline = Arc::clone(&worker_pipeline);
                    let image_id = task.image_id;
                    let image = task.image;
                    let result = tokio::task::spawn_blocking(move || {
                        pipeline
                            .segment(&image)
                            .map(|segmentation| Segmented { image, segmentation })
                    })
                    .await
                        .unwrap_or_else(|e| {
                            Err(SegmentationError::WorkerPool(format!("image {image_id}: {e}")))
                        });
                    let _ = task.result_sender.send(result);
                }
            });
            workers.push(worker);
        }

        Self { task_sender, workers }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub async fn process_image(&self, image_id: u64, image: RgbImage) -> Result<Segmented> {
        let (result_sender, result_receiver) = oneshot::channel();
        let task = SegmentTask {
            image_id,
            image,
            result_sender,
        };

        self.task_sender
            .send(task)
            .map_err(|_| SegmentationError::WorkerPool("failed to send task to worker pool".into()))?;

        result_receiver
            .await
            .map_err(|_| SegmentationError::WorkerPool("failed to receive result from worker".into()))?
    }
}

pub struct ParallelPipeline {
    config: PipelineConfig,
    worker_pool: WorkerPool,
}

impl ParallelPipeline {
    /// One worker per logical CPU. Must be called inside a tokio runtime.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        Self::with_workers(config, num_cpus::get())
    }

    pub fn with_workers(config: PipelineConfig, worker_count: usize) -> Result<Self> {
        let pipeline = Arc::new(PillPipeline::new(config.clone())?);
        let worker_pool = WorkerPool::new(pipeline, worker_count);
        debug!("parallel pipeline started with {} workers", worker_pool.worker_count());
        Ok(Self { config, worker_pool })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn process_image(&self, image: RgbImage) -> Result<Segmented> {
        self.worker_pool.process_image(0, image).await
    }

    /// Segments every image; results are in input order.
    pub async fn process_batch(&self, images: Vec<RgbImage>) -> Vec<Result<Segmented>> {
        let pending = images
            .into_iter()
            .enumerate()
            .map(|(index, image)| self.worker_pool.process_image(index as u64, image));
        join_all(pending).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::chroma_masker::ChromaMode;
    use crate::core_modules::luminance_masker::LuminanceMode;
    use image::Rgb;

    fn squares(count: u32) -> RgbImage {
        let mut image = RgbImage::from_pixel(100, 100, Rgb([255, 255, 255]));
        for n in 0..count {
            let corner = 10 + n * 50;
            for y in corner..corner + 20 {
                for x in corner..corner + 20 {
                    image.put_pixel(x, y, Rgb([0, 0, 255]));
                }
            }
        }
        image
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            luminance_mode: LuminanceMode::Global,
            chroma_mode: ChromaMode::Otsu,
            ..PipelineConfig::default()
        }
    }

    #[tokio::test]
    async fn batch_results_keep_input_order() {
        let pipeline = ParallelPipeline::with_workers(config(), 3).unwrap();
        let images = vec![squares(2), squares(0), squares(1), squares(2)];
        let counts: Vec<usize> = pipeline
            .process_batch(images)
            .await
            .into_iter()
            .map(|r| r.unwrap().segmentation.count())
            .collect();
        assert_eq!(counts, vec![2, 0, 1, 2]);
    }

    #[tokio::test]
    async fn errors_are_reported_per_image() {
        let pipeline = ParallelPipeline::with_workers(config(), 2).unwrap();
        let results = pipeline.process_batch(vec![RgbImage::new(0, 0), squares(1)]).await;
        assert!(matches!(results[0], Err(SegmentationError::InvalidInput(_))));
        assert_eq!(results[1].as_ref().unwrap().segmentation.count(), 1);
    }

    #[tokio::test]
    async fn images_come_back_with_their_segmentation() {
        let pipeline = ParallelPipeline::with_workers(PipelineConfig::default(), 2).unwrap();
        let images = vec![squares(1), squares(2)];
        let results = pipeline.process_batch(images.clone()).await;
        for (sent, result) in images.iter().zip(results) {
            let segmented = result.unwrap();
            assert_eq!(&segmented.image, sent);
            assert_eq!(segmented.segmentation.fusion.fused_mask.dimensions(), sent.dimensions());
        }
    }

    #[tokio::test]
    async fn zero_workers_still_runs_one() {
        let pipeline = ParallelPipeline::with_workers(config(), 0).unwrap();
        assert_eq!(pipeline.process_image(squares(1)).await.unwrap().segmentation.count(), 1);
    }
}
