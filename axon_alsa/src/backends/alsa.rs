//! Backends on top of alsa-lib.

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction as AlsaDirection, ValueOr};

use crate::backend::{Direction, PcmBackend, PcmHandle, PcmIoResult, classify_errno};
use crate::config::{PcmConfig, SampleFormat};
use crate::error::{AlsaError, Result};
use crate::mixer::{MixerBackend, MixerDevice};

impl From<Direction> for AlsaDirection {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Playback => AlsaDirection::Playback,
            Direction::Capture => AlsaDirection::Capture,
        }
    }
}

/// PCM access through alsa-lib.
#[derive(Debug, Default, Clone)]
pub struct AlsaPcmBackend;

impl PcmBackend for AlsaPcmBackend {
    fn open(
        &self,
        card: u32,
        device: u32,
        direction: Direction,
        config: &PcmConfig,
    ) -> Result<Box<dyn PcmHandle>> {
        let name = format!("hw:{card},{device}");
        let pcm = PCM::new(&name, direction.into(), false)
            .map_err(|e| AlsaError::Backend(format!("open {name}: {e}")))?;

        {
            let hwp = HwParams::any(&pcm)
                .map_err(|e| AlsaError::Backend(format!("hw params {name}: {e}")))?;
            hwp.set_access(Access::RWInterleaved)
                .and_then(|_| hwp.set_channels(config.channels))
                .and_then(|_| hwp.set_rate(config.rate, ValueOr::Nearest))
                .and_then(|_| {
                    hwp.set_format(match config.format {
                        SampleFormat::S16Le => Format::s16(),
                    })
                })
                .and_then(|_| {
                    hwp.set_period_size(config.period_size as i64, ValueOr::Nearest)
                })
                .and_then(|_| hwp.set_periods(config.period_count, ValueOr::Nearest))
                .and_then(|_| pcm.hw_params(&hwp))
                .map_err(|e| AlsaError::Backend(format!("hw params {name}: {e}")))?;
        }

        Ok(Box::new(AlsaPcmHandle {
            pcm,
            frame_bytes: config.frame_bytes(),
        }))
    }
}

struct AlsaPcmHandle {
    pcm: PCM,
    frame_bytes: usize,
}

// SAFETY: the handle is owned by exactly one stream at a time and all
// transfers are serialised behind the stream lock.
unsafe impl Send for AlsaPcmHandle {}

impl AlsaPcmHandle {
    fn map_err<T>(result: alsa::Result<T>) -> PcmIoResult<T> {
        result.map_err(|e| classify_errno(e.errno()))
    }
}

impl PcmHandle for AlsaPcmHandle {
    fn prepare(&mut self) -> PcmIoResult<()> {
        Self::map_err(self.pcm.prepare())
    }

    fn start(&mut self) -> PcmIoResult<()> {
        Self::map_err(self.pcm.start())
    }

    fn stop(&mut self) -> PcmIoResult<()> {
        Self::map_err(self.pcm.drop())
    }

    fn write(&mut self, buf: &[u8]) -> PcmIoResult<usize> {
        let io = Self::map_err(self.pcm.io_bytes())?;
        let frames = Self::map_err(io.writei(buf))?;
        Ok(frames * self.frame_bytes)
    }

    fn read(&mut self, buf: &mut [u8]) -> PcmIoResult<usize> {
        let io = Self::map_err(self.pcm.io_bytes())?;
        let frames = Self::map_err(io.readi(buf))?;
        Ok(frames * self.frame_bytes)
    }
}

/// Mixer access through alsa-lib simple elements.
#[derive(Debug, Default, Clone)]
pub struct AlsaMixerBackend;

impl MixerBackend for AlsaMixerBackend {
    fn open(&self, card: u32) -> Result<Box<dyn MixerDevice>> {
        let mixer = alsa::mixer::Mixer::new(&format!("hw:{card}"), false)
            .map_err(|_| AlsaError::MixerOpen(card))?;
        Ok(Box::new(AlsaMixerDevice { mixer }))
    }
}

struct AlsaMixerDevice {
    mixer: alsa::mixer::Mixer,
}

impl AlsaMixerDevice {
    fn selem(&self, name: &str) -> Option<alsa::mixer::Selem<'_>> {
        self.mixer
            .find_selem(&alsa::mixer::SelemId::new(name, 0))
    }
}

impl MixerDevice for AlsaMixerDevice {
    fn has_control(&self, name: &str) -> bool {
        self.selem(name).is_some()
    }

    fn range(&self, name: &str) -> Option<(i64, i64)> {
        let selem = self.selem(name)?;
        if selem.has_capture_volume() {
            Some(selem.get_capture_volume_range())
        } else if selem.has_playback_volume() {
            Some(selem.get_playback_volume_range())
        } else {
            // Switches are 0..1.
            Some((0, 1))
        }
    }

    fn value_count(&self, name: &str) -> usize {
        let Some(selem) = self.selem(name) else {
            return 0;
        };
        use alsa::mixer::SelemChannelId;
        SelemChannelId::all()
            .iter()
            .filter(|&&ch| selem.has_capture_channel(ch) || selem.has_playback_channel(ch))
            .count()
            .max(1)
    }

    fn value(&self, name: &str, index: usize) -> Option<i64> {
        use alsa::mixer::SelemChannelId;
        let selem = self.selem(name)?;
        let channel = *SelemChannelId::all().get(index)?;
        if selem.has_capture_volume() {
            selem.get_capture_volume(channel).ok()
        } else if selem.has_playback_volume() {
            selem.get_playback_volume(channel).ok()
        } else if selem.has_capture_switch() {
            selem.get_capture_switch(channel).ok().map(i64::from)
        } else if selem.has_playback_switch() {
            selem.get_playback_switch(channel).ok().map(i64::from)
        } else {
            None
        }
    }

    fn set_value(&mut self, name: &str, index: usize, value: i64) -> bool {
        use alsa::mixer::SelemChannelId;
        let Some(selem) = self.selem(name) else {
            return false;
        };
        let Some(&channel) = SelemChannelId::all().get(index) else {
            return false;
        };
        if selem.has_capture_volume() {
            selem.set_capture_volume(channel, value).is_ok()
        } else if selem.has_playback_volume() {
            selem.set_playback_volume(channel, value).is_ok()
        } else if selem.has_capture_switch() {
            selem.set_capture_switch_all(value as i32).is_ok()
        } else if selem.has_playback_switch() {
            selem.set_playback_switch_all(value as i32).is_ok()
        } else {
            false
        }
    }
}
