//! Saving simulated concentration images to HDF5 files

use hdf5::{Dataset, File};
use ndarray::ArrayView2;
use std::path::Path;

pub use hdf5::Result;

/// Common configuration for writing to HDF5 files
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Config<'dsname, FileName: AsRef<Path>> {
    /// Name of the HDF5 file to be accessed
    pub file_name: FileName,

    /// Name of the concentration dataset within the file
    pub dataset_name: Option<&'dsname str>,
}
//
impl<'dsname, FileName: AsRef<Path>> Config<'dsname, FileName> {
    fn dataset_name(&self) -> &'dsname str {
        self.dataset_name.unwrap_or("concentration")
    }
}

/// Mechanism to write concentration images into an HDF5 file
///
/// Images are stacked along the first axis of the concentration dataset, the
/// simulated time of each image goes to a companion `time` dataset.
pub struct Writer {
    /// File handle
    file: File,

    /// Stack of concentration images
    images: Dataset,

    /// Simulated time of each image
    times: Dataset,

    /// Number of images that were written so far
    position: usize,
}
//
impl Writer {
    /// Create or truncate a file
    ///
    /// The file will be dimensioned to store a certain amount of concentration
    /// images of shape `[rows, cols]`.
    pub fn create(
        config: Config<'_, impl AsRef<Path>>,
        [rows, cols]: [usize; 2],
        num_images: usize,
    ) -> Result<Self> {
        let dataset_name = config.dataset_name();
        let file = File::create(config.file_name)?;
        let images = file
            .new_dataset::<f64>()
            .chunk([1, rows, cols])
            .shape([num_images, rows, cols])
            .lzf()
            .create(dataset_name)?;
        let times = file.new_dataset::<f64>().shape([num_images]).create("time")?;
        Ok(Self {
            file,
            images,
            times,
            position: 0,
        })
    }

    /// Write the next concentration image and its simulated time
    pub fn write(&mut self, time: f64, image: ArrayView2<'_, f64>) -> Result<()> {
        self.images.write_slice(image, (self.position, .., ..))?;
        self.times
            .write_slice(&[time][..], self.position..self.position + 1)?;
        self.position += 1;
        Ok(())
    }

    /// Flush the file to the underlying storage medium and close it
    ///
    /// This should automatically happen on Drop, but doing it manually allows
    /// you to catch and handle errors, instead of letting them lead to panics.
    pub fn close(self) -> Result<()> {
        self.file.close()
    }
}
