//! Signal fusion.
//!
//! A real mark usually trips two unrelated detectors at once, so detector
//! masks are first ANDed inside signal groups and the groups are ORed into
//! a candidate. The candidate is then gated by saliency and stripped of
//! protected pixels. Everything here is plain boolean algebra on masks.

use crate::detectors::{DENSITY, PERIODIC, STRUCTURAL, TEXTURE};
use crate::raster::Mask;

/// Detectors whose masks must agree for a pixel to count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalGroup {
    /// Name used in debug output.
    pub name: &'static str,
    /// Detector names, matched against [`Detector::name`](crate::detectors::Detector::name).
    pub members: Vec<&'static str>,
}

impl SignalGroup {
    /// Group requiring every named detector.
    #[must_use]
    pub fn new(name: &'static str, members: &[&'static str]) -> Self {
        Self {
            name,
            members: members.to_vec(),
        }
    }

    /// AND of all member masks.
    ///
    /// A member with no mask in `signals`, or a group without members,
    /// contributes nothing.
    #[must_use]
    pub fn combine(&self, signals: &Signals) -> Option<Mask> {
        let mut members = self.members.iter();
        let first = signals.get(members.next()?)?.clone();
        members.try_fold(first, |acc, name| signals.get(name).map(|m| acc.and(m)))
    }
}

/// Grid-style marks: textured and periodic.
#[must_use]
pub fn grid_signal() -> SignalGroup {
    SignalGroup::new("grid", &[TEXTURE, PERIODIC])
}

/// Text-style marks: dense edges forming stable shapes.
#[must_use]
pub fn text_signal() -> SignalGroup {
    SignalGroup::new("text", &[DENSITY, STRUCTURAL])
}

/// The two built-in groups.
#[must_use]
pub fn default_groups() -> Vec<SignalGroup> {
    vec![grid_signal(), text_signal()]
}

/// Named detector masks for one image, in detector order.
#[derive(Debug, Clone, Default)]
pub struct Signals {
    entries: Vec<(&'static str, Mask)>,
}

impl Signals {
    /// Record the mask of one detector, replacing an earlier one of the same name.
    pub fn insert(&mut self, name: &'static str, mask: Mask) {
        if let Some(slot) = self.entries.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = mask;
        } else {
            self.entries.push((name, mask));
        }
    }

    /// Mask of the named detector.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Mask> {
        self.entries.iter().find(|(n, _)| *n == name).map(|(_, m)| m)
    }

    /// All recorded masks.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Mask)> {
        self.entries.iter().map(|(n, m)| (*n, m))
    }
}

/// Every intermediate of one fusion pass.
#[derive(Debug, Clone)]
pub struct Fusion {
    /// Per-group AND masks, in group order.
    pub groups: Vec<(&'static str, Mask)>,
    /// OR of all group masks.
    pub candidate: Mask,
    /// Candidate restricted to salient pixels.
    pub gated: Mask,
    /// Gated candidate minus protected pixels.
    pub fused: Mask,
}

/// Fuse detector masks into a protected watermark candidate.
///
/// `saliency` and `protection` must match the signal dimensions.
#[must_use]
pub fn fuse(
    signals: &Signals,
    groups: &[SignalGroup],
    saliency: &Mask,
    protection: &Mask,
) -> Fusion {
    let (w, h) = saliency.dimensions();
    let groups: Vec<(&'static str, Mask)> = groups
        .iter()
        .map(|g| (g.name, g.combine(signals).unwrap_or_else(|| Mask::empty(w, h))))
        .collect();

    let candidate = groups
        .iter()
        .fold(Mask::empty(w, h), |acc, (_, m)| acc.or(m));
    let gated = candidate.and(saliency);
    let fused = gated.and_not(protection);
    Fusion {
        groups,
        candidate,
        gated,
        fused,
    }
}
