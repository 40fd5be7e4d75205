// surfrec/src/encoder/muxer.rs
//
//! Writers that turn a span of encoded packets into a file.

use super::MediaFormat;
use crate::circular_buffer::PacketInfo;
use crate::Error;

use log::debug;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Accepts the format once, then samples in order starting from a keyframe.
pub trait Muxer {
    fn start(&mut self, format: &MediaFormat) -> Result<(), Error>;
    fn write_sample(&mut self, data: &[u8], info: &PacketInfo) -> Result<(), Error>;
    /// Finalizes the file.
    fn finish(self: Box<Self>) -> Result<(), Error>;
}

/// Creates a muxer writing to `path`. The file must not exist before `create` is called for it.
pub trait MuxerFactory: Send {
    fn create(&mut self, path: &Path) -> Result<Box<dyn Muxer>, Error>;
}

impl<F> MuxerFactory for F
where
    F: FnMut(&Path) -> Result<Box<dyn Muxer>, Error> + Send,
{
    fn create(&mut self, path: &Path) -> Result<Box<dyn Muxer>, Error> {
        (self)(path)
    }
}

/// Writes a raw elementary stream: the codec config blobs followed by every sample payload.
pub struct ElementaryStreamMuxer {
    path: PathBuf,
    writer: BufWriter<File>,
    samples: usize,
}

impl ElementaryStreamMuxer {
    pub fn create(path: &Path) -> Result<ElementaryStreamMuxer, Error> {
        Ok(ElementaryStreamMuxer {
            path: path.to_owned(),
            writer: BufWriter::new(File::create(path)?),
            samples: 0,
        })
    }

    /// A factory producing elementary-stream muxers.
    pub fn factory() -> impl MuxerFactory {
        |path: &Path| -> Result<Box<dyn Muxer>, Error> {
            Ok(Box::new(ElementaryStreamMuxer::create(path)?))
        }
    }
}

impl Muxer for ElementaryStreamMuxer {
    fn start(&mut self, format: &MediaFormat) -> Result<(), Error> {
        for blob in &format.codec_config {
            self.writer.write_all(blob)?;
        }
        Ok(())
    }

    fn write_sample(&mut self, data: &[u8], _: &PacketInfo) -> Result<(), Error> {
        self.writer.write_all(data)?;
        self.samples += 1;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<(), Error> {
        self.writer.flush()?;
        debug!("wrote {} samples to {}", self.samples, self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::{ElementaryStreamMuxer, MuxerFactory};
    use crate::circular_buffer::{PacketFlags, PacketInfo};
    use crate::encoder::MediaFormat;

    use std::fs;

    #[test]
    fn writes_config_then_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.h264");
        let format = MediaFormat {
            mime: "video/avc".to_owned(),
            width: 64,
            height: 64,
            codec_config: vec![vec![0, 0, 0, 1, 0x67], vec![0, 0, 0, 1, 0x68]],
        };
        let info = PacketInfo { flags: PacketFlags::KEY_FRAME, ..PacketInfo::default() };

        let mut factory = ElementaryStreamMuxer::factory();
        let mut muxer = factory.create(&path).unwrap();
        muxer.start(&format).unwrap();
        muxer.write_sample(&[1, 2, 3], &info).unwrap();
        muxer.write_sample(&[4], &PacketInfo::default()).unwrap();
        muxer.finish().unwrap();

        assert_eq!(
            fs::read(&path).unwrap(),
            vec![0, 0, 0, 1, 0x67, 0, 0, 0, 1, 0x68, 1, 2, 3, 4]
        );
    }
}
