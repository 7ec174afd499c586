pub mod calibration;
pub mod detections;
pub mod image_io;
pub mod region;
