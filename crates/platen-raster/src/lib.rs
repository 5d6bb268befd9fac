// SPDX-License-Identifier: Apache-2.0
//
// Raster transform pipeline: turns a PDF or JPEG document into a
// printer-ready PWG Raster or PCL byte stream.
//
// The pipeline renders pages in bands (bounded by a 16 MiB band buffer),
// dispatching each output row to one of two back-ends. Progress and
// printer-state updates are reported to the parent server on stderr using
// `ATTR:` / `STATE:` lines.

pub mod dither;
pub mod header;
pub mod jpeg;
pub mod media;
pub mod options;
pub mod packbits;
pub mod page;
pub mod pcl;
pub mod pdf;
pub mod pwg;
pub mod raster;

pub use header::RasterHeader;
pub use media::Media;
pub use options::Options;
pub use raster::{run_transform, TransformSpec};
