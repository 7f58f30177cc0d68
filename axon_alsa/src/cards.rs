//! Sound-card discovery from the kernel `/proc` topology.
//!
//! Card numbering is assigned by probe order and changes across boots,
//! so every role (speaker, HDMI, S/PDIF, modem, microphone, ...) is
//! resolved at stream start by matching `card<i>/id` against ordered
//! match tables, optionally qualified by the DAI id published in the
//! per-pcm `info` node.

use std::fs;
use std::path::{Path, PathBuf};

/// Playback role slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputRole {
    Speaker,
    Hdmi,
    Spdif,
    /// Bluetooth/modem telephony card. A SIMCOM modem advertises its
    /// USB audio function under this role.
    Modem,
}

impl OutputRole {
    pub const ALL: [OutputRole; 4] = [
        OutputRole::Speaker,
        OutputRole::Hdmi,
        OutputRole::Spdif,
        OutputRole::Modem,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OutputRole::Speaker => "speaker",
            OutputRole::Hdmi => "hdmi",
            OutputRole::Spdif => "spdif",
            OutputRole::Modem => "modem",
        }
    }
}

/// Capture role slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputRole {
    Mic,
    HdmiIn,
    /// Bluetooth/modem telephony capture (far-end voice).
    ModemIn,
}

impl InputRole {
    pub const ALL: [InputRole; 3] = [InputRole::Mic, InputRole::HdmiIn, InputRole::ModemIn];

    pub fn as_str(self) -> &'static str {
        match self {
            InputRole::Mic => "mic",
            InputRole::HdmiIn => "hdmi-in",
            InputRole::ModemIn => "modem-in",
        }
    }
}

/// A resolved `(card, device)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardAddress {
    pub card: u32,
    pub device: u32,
}

/// One row of a role match table.
#[derive(Debug, Clone, Copy)]
pub struct CardMatch {
    /// Card id from `card<i>/id`.
    pub id: &'static str,
    /// Optional DAI qualifier matched as a substring of the pcm `info`
    /// node's `id:` line. Absent means device 0.
    pub dai: Option<&'static str>,
}

const fn m(id: &'static str, dai: Option<&'static str>) -> CardMatch {
    CardMatch { id, dai }
}

pub const SPEAKER_CARDS: &[CardMatch] = &[
    m("realtekrt5616c", None),
    m("realtekrt5651co", Some("rt5651-aif1")),
    m("realtekrt5670c", None),
    m("realtekrt5672c", None),
    m("realtekrt5678co", None),
    m("rkhdmianalogsnd", None),
    m("rockchipcx2072x", None),
    m("rockchipes8316c", None),
    m("rockchipes8323c", None),
    m("rockchipes8388c", None),
    m("rockchipes8396c", None),
    m("rockchiprk", None),
    m("rockchiprk809co", None),
    m("rockchiprk817co", None),
    m("rockchiprt5640c", Some("rt5640-aif1")),
    m("rockchiprt5670c", None),
    m("rockchiprt5672c", None),
];

pub const HDMI_CARDS: &[CardMatch] = &[
    m("realtekrt5651co", Some("i2s-hifi")),
    m("realtekrt5670co", Some("i2s-hifi")),
    m("rkhdmidpsound", None),
    m("rockchiphdmi", None),
    m("rockchiprt5640c", Some("i2s-hifi")),
];

pub const SPDIF_CARDS: &[CardMatch] = &[
    m("ROCKCHIPSPDIF", Some("dit-hifi")),
    m("rockchipspdif", None),
    m("rockchipcdndp", None),
];

pub const MODEM_CARDS: &[CardMatch] = &[
    // The SIMCOM USB audio function doubles as the telephony card.
    m("SIMCOM", None),
    m("rockchipbt", None),
];

pub const MIC_CARDS: &[CardMatch] = &[
    m("realtekrt5616c", None),
    m("realtekrt5651co", Some("rt5651-aif1")),
    m("realtekrt5670c", None),
    m("realtekrt5672c", None),
    m("realtekrt5678co", None),
    m("rockchipes8316c", None),
    m("rockchipes8323c", None),
    m("rockchipes8396c", None),
    m("rockchipes7210", None),
    m("rockchipes7243", None),
    m("rockchiprk", None),
    m("rockchiprk809co", None),
    m("rockchiprk817co", None),
    m("rockchiprt5640c", None),
    m("rockchiprt5670c", None),
    m("rockchiprt5672c", None),
];

pub const HDMI_IN_CARDS: &[CardMatch] = &[
    m("realtekrt5651co", Some("tc358749x-audio")),
    m("hdmiin", None),
];

pub const MODEM_IN_CARDS: &[CardMatch] = &[m("SIMCOM", None), m("rockchipbt", None)];

/// Highest card slot probed.
pub const MAX_CARDS: u32 = 8;
/// Highest pcm device probed per card.
pub const MAX_DEVICES: u32 = 8;

/// Resolved role table for one scan.
#[derive(Debug, Clone, Default)]
pub struct CardTopology {
    speaker: Option<CardAddress>,
    hdmi: Option<CardAddress>,
    spdif: Option<CardAddress>,
    modem: Option<CardAddress>,
    mic: Option<CardAddress>,
    hdmi_in: Option<CardAddress>,
    modem_in: Option<CardAddress>,
    /// Set when the modem slot's card id contains `SIMCOM`
    /// (case-insensitive); gates the strict modem PCM configuration.
    modem_is_voice: bool,
}

impl CardTopology {
    pub fn output(&self, role: OutputRole) -> Option<CardAddress> {
        match role {
            OutputRole::Speaker => self.speaker,
            OutputRole::Hdmi => self.hdmi,
            OutputRole::Spdif => self.spdif,
            OutputRole::Modem => self.modem,
        }
    }

    pub fn input(&self, role: InputRole) -> Option<CardAddress> {
        match role {
            InputRole::Mic => self.mic,
            InputRole::HdmiIn => self.hdmi_in,
            InputRole::ModemIn => self.modem_in,
        }
    }

    /// Whether the detected modem card is a SIMCOM voice modem.
    pub fn modem_is_voice(&self) -> bool {
        self.modem_is_voice
    }

    fn output_slot(&mut self, role: OutputRole) -> &mut Option<CardAddress> {
        match role {
            OutputRole::Speaker => &mut self.speaker,
            OutputRole::Hdmi => &mut self.hdmi,
            OutputRole::Spdif => &mut self.spdif,
            OutputRole::Modem => &mut self.modem,
        }
    }

    fn input_slot(&mut self, role: InputRole) -> &mut Option<CardAddress> {
        match role {
            InputRole::Mic => &mut self.mic,
            InputRole::HdmiIn => &mut self.hdmi_in,
            InputRole::ModemIn => &mut self.modem_in,
        }
    }
}

/// Scores a card id against a table entry: 100 for equality, 50 for a
/// substring hit, 0 otherwise.
fn name_match(id: &str, wanted: &str) -> u32 {
    if id == wanted {
        100
    } else if id.contains(wanted) {
        50
    } else {
        0
    }
}

/// Scanner over a `/proc/asound`-shaped tree.
#[derive(Debug, Clone)]
pub struct CardScanner {
    root: PathBuf,
}

impl Default for CardScanner {
    fn default() -> Self {
        Self::new("/proc/asound")
    }
}

impl CardScanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Enumerates the card slots and resolves every role. A missing
    /// `card<i>/id` node ends the enumeration; an unreadable one skips
    /// the card. Slots with no match stay unresolved.
    pub fn scan(&self) -> CardTopology {
        let mut topology = CardTopology::default();

        for card in 0..MAX_CARDS {
            let id_path = self.root.join(format!("card{card}/id"));
            if !id_path.exists() {
                break;
            }
            let Some(id) = read_trimmed(&id_path) else {
                continue;
            };
            log::debug!("card{card} id: {id}");

            for role in OutputRole::ALL {
                if topology.output(role).is_none()
                    && let Some(address) = self.resolve(card, &id, table_for_output(role), 'p')
                {
                    log::debug!("{} -> card {card} device {}", role.as_str(), address.device);
                    *topology.output_slot(role) = Some(address);
                }
            }
            for role in InputRole::ALL {
                if topology.input(role).is_none()
                    && let Some(address) = self.resolve(card, &id, table_for_input(role), 'c')
                {
                    log::debug!("{} -> card {card} device {}", role.as_str(), address.device);
                    *topology.input_slot(role) = Some(address);
                }
            }
        }

        if let Some(modem) = topology.modem
            && let Some(id) = read_trimmed(&self.root.join(format!("card{}/id", modem.card)))
        {
            topology.modem_is_voice = id.to_ascii_lowercase().contains("simcom");
        }

        topology
    }

    /// Walks one role table for one card. The best-scoring entry wins,
    /// first on ties; an entry with a DAI qualifier additionally needs
    /// a matching pcm device.
    fn resolve(
        &self,
        card: u32,
        id: &str,
        table: &[CardMatch],
        stream_suffix: char,
    ) -> Option<CardAddress> {
        let mut best = 0u32;
        let mut index = None;
        for (i, entry) in table.iter().enumerate() {
            let score = name_match(id, entry.id);
            if score > best {
                best = score;
                index = Some(i);
            }
        }
        let entry = &table[index?];

        match entry.dai {
            None => Some(CardAddress { card, device: 0 }),
            Some(dai) => {
                for device in 0..MAX_DEVICES {
                    let info_path = self
                        .root
                        .join(format!("card{card}/pcm{device}{stream_suffix}/info"));
                    if !info_path.exists() {
                        break;
                    }
                    let Some(info) = read_trimmed(&info_path) else {
                        continue;
                    };
                    if dai_id_matches(&info, dai) {
                        return Some(CardAddress { card, device });
                    }
                }
                None
            }
        }
    }

    /// Whether the capture substream status node reports `closed`,
    /// meaning no client is reading the card.
    pub fn capture_closed(&self, card: u32) -> bool {
        let path = self.root.join(format!("card{card}/pcm0c/sub0/status"));
        match read_trimmed(&path) {
            Some(status) => status == "closed",
            None => true,
        }
    }
}

fn table_for_output(role: OutputRole) -> &'static [CardMatch] {
    match role {
        OutputRole::Speaker => SPEAKER_CARDS,
        OutputRole::Hdmi => HDMI_CARDS,
        OutputRole::Spdif => SPDIF_CARDS,
        OutputRole::Modem => MODEM_CARDS,
    }
}

fn table_for_input(role: InputRole) -> &'static [CardMatch] {
    match role {
        InputRole::Mic => MIC_CARDS,
        InputRole::HdmiIn => HDMI_IN_CARDS,
        InputRole::ModemIn => MODEM_IN_CARDS,
    }
}

fn read_trimmed(path: &Path) -> Option<String> {
    let text = fs::read_to_string(path).ok()?;
    Some(text.trim_end_matches(['\n', '\r']).to_string())
}

/// Isolates the text after `id:` up to end-of-line in a pcm `info` node
/// and checks the wanted DAI id for a substring hit.
fn dai_id_matches(info: &str, dai: &str) -> bool {
    let Some(start) = info.find("id:") else {
        return false;
    };
    let id = &info[start + 3..];
    let id = id.split(['\r', '\n']).next().unwrap_or(id);
    id.contains(dai)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    struct ProcTree {
        dir: tempfile::TempDir,
    }

    impl ProcTree {
        fn new() -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
            }
        }

        fn add_card(&self, index: u32, id: &str) {
            let card = self.dir.path().join(format!("card{index}"));
            fs::create_dir_all(&card).unwrap();
            fs::write(card.join("id"), format!("{id}\n")).unwrap();
        }

        fn add_pcm_info(&self, card: u32, device: u32, suffix: char, dai: &str) {
            let pcm = self
                .dir
                .path()
                .join(format!("card{card}/pcm{device}{suffix}"));
            fs::create_dir_all(&pcm).unwrap();
            fs::write(
                pcm.join("info"),
                format!("card: {card}\ndevice: {device}\nid: ff880000.i2s-{dai} {dai}-0\n"),
            )
            .unwrap();
        }

        fn scanner(&self) -> CardScanner {
            CardScanner::new(self.dir.path())
        }
    }

    #[test]
    fn test_empty_tree_resolves_nothing() {
        let tree = ProcTree::new();
        let topology = tree.scanner().scan();
        assert!(topology.output(OutputRole::Speaker).is_none());
        assert!(topology.input(InputRole::Mic).is_none());
        assert!(!topology.modem_is_voice());
    }

    #[test]
    fn test_exact_match_without_dai_takes_device_zero() {
        let tree = ProcTree::new();
        tree.add_card(0, "rockchipes8316c");
        let topology = tree.scanner().scan();
        assert_eq!(
            topology.output(OutputRole::Speaker),
            Some(CardAddress { card: 0, device: 0 })
        );
        assert_eq!(
            topology.input(InputRole::Mic),
            Some(CardAddress { card: 0, device: 0 })
        );
    }

    #[test]
    fn test_dai_qualifier_selects_device() {
        let tree = ProcTree::new();
        tree.add_card(1, "realtekrt5651co");
        tree.add_pcm_info(1, 0, 'p', "rt5651-aif1");
        tree.add_pcm_info(1, 1, 'p', "i2s-hifi");
        tree.add_pcm_info(1, 0, 'c', "rt5651-aif1");

        let topology = tree.scanner().scan();
        assert_eq!(
            topology.output(OutputRole::Speaker),
            Some(CardAddress { card: 1, device: 0 })
        );
        // The same card carries the HDMI DAI on device 1.
        assert_eq!(
            topology.output(OutputRole::Hdmi),
            Some(CardAddress { card: 1, device: 1 })
        );
        assert_eq!(
            topology.input(InputRole::Mic),
            Some(CardAddress { card: 1, device: 0 })
        );
    }

    #[test]
    fn test_missing_dai_device_leaves_slot_unresolved() {
        let tree = ProcTree::new();
        tree.add_card(0, "realtekrt5651co");
        // No pcm info nodes at all: the DAI-qualified entries cannot
        // resolve and the slots stay empty.
        let topology = tree.scanner().scan();
        assert!(topology.output(OutputRole::Speaker).is_none());
    }

    #[test]
    fn test_substring_match_scores_lower_than_exact() {
        let tree = ProcTree::new();
        // "rockchiprk809co" contains "rockchiprk" (score 50) but equals
        // "rockchiprk809co" (score 100); the exact entry must win even
        // though the substring entry comes first in the table.
        tree.add_card(0, "rockchiprk809co");
        let topology = tree.scanner().scan();
        assert_eq!(
            topology.output(OutputRole::Speaker),
            Some(CardAddress { card: 0, device: 0 })
        );
    }

    #[test]
    fn test_simcom_modem_detection() {
        let tree = ProcTree::new();
        tree.add_card(0, "SIMCOMAudio");
        tree.add_card(1, "rockchipes8316c");

        let topology = tree.scanner().scan();
        assert_eq!(
            topology.output(OutputRole::Modem),
            Some(CardAddress { card: 0, device: 0 })
        );
        assert!(topology.modem_is_voice());
        assert_eq!(
            topology.input(InputRole::ModemIn),
            Some(CardAddress { card: 0, device: 0 })
        );
    }

    #[test]
    fn test_bt_card_is_not_voice_modem() {
        let tree = ProcTree::new();
        tree.add_card(0, "rockchipbt");
        let topology = tree.scanner().scan();
        assert_eq!(
            topology.output(OutputRole::Modem),
            Some(CardAddress { card: 0, device: 0 })
        );
        assert!(!topology.modem_is_voice());
    }

    #[test]
    fn test_enumeration_stops_at_gap() {
        let tree = ProcTree::new();
        tree.add_card(0, "rockchipspdif");
        // card1 missing; card2 must not be reached.
        tree.add_card(2, "rockchipes8316c");

        let topology = tree.scanner().scan();
        assert!(topology.output(OutputRole::Spdif).is_some());
        assert!(topology.output(OutputRole::Speaker).is_none());
    }

    #[test]
    fn test_first_resolved_card_keeps_slot() {
        let tree = ProcTree::new();
        tree.add_card(0, "rockchipes8316c");
        tree.add_card(1, "rockchipes8323c");
        let topology = tree.scanner().scan();
        assert_eq!(topology.output(OutputRole::Speaker).unwrap().card, 0);
    }

    #[test]
    fn test_capture_status_probe() {
        let tree = ProcTree::new();
        tree.add_card(0, "rockchipes8316c");
        let sub = tree.dir.path().join("card0/pcm0c/sub0");
        fs::create_dir_all(&sub).unwrap();
        fs::write(sub.join("status"), "closed\n").unwrap();
        assert!(tree.scanner().capture_closed(0));

        fs::write(sub.join("status"), "state: RUNNING\n").unwrap();
        assert!(!tree.scanner().capture_closed(0));
    }

    #[test]
    fn test_dai_id_line_isolation() {
        assert!(dai_id_matches("id: ff880000.i2s-rt5651-aif1 rt5651-aif1-0", "rt5651-aif1"));
        assert!(dai_id_matches(
            "card: 1\nid: i2s-hifi dit\nsubdevice: 0",
            "i2s-hifi"
        ));
        assert!(!dai_id_matches("id: i2s-hifi\nextra: rt5651-aif1", "rt5651-aif1"));
        assert!(!dai_id_matches("no id line here", "rt5651-aif1"));
    }
}
