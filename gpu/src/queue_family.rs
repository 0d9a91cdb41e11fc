//! Queue family selection.
//!
//! Each [`QueueKind`] is mapped to one family. Dedicated families are preferred
//! for compute and transfer work so it can overlap with graphics; when a device
//! has none, the kind falls back to the graphics family.

use crate::error::{GpuError, GpuResult};
use crate::types::{QueueFamilyId, QueueFamilyProperties, QueueFlags, QueueKind};

/// The family chosen for each kind of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueFamilySelection {
    graphics: QueueFamilyId,
    compute: QueueFamilyId,
    transfer: QueueFamilyId,
}

impl QueueFamilySelection {
    /// Select families from the properties reported by the driver.
    ///
    /// Among the families that qualify for a kind, the one with the fewest
    /// capability bits wins; ties go to the lowest index.
    pub fn select(families: &[QueueFamilyProperties]) -> GpuResult<Self> {
        let any_present = families
            .iter()
            .any(|f| f.supports_present && f.flags.contains(QueueFlags::GRAPHICS));
        let graphics = least_capable(families, |f| {
            f.flags.contains(QueueFlags::GRAPHICS) && (f.supports_present || !any_present)
        })
        .ok_or(GpuError::NoQueueFamily(QueueKind::Graphics))?;

        let compute = least_capable(families, |f| {
            f.flags.contains(QueueFlags::COMPUTE) && !f.flags.contains(QueueFlags::GRAPHICS)
        })
        .unwrap_or(graphics);

        let transfer = least_capable(families, |f| {
            f.flags.contains(QueueFlags::TRANSFER)
                && !f.flags.intersects(QueueFlags::GRAPHICS | QueueFlags::COMPUTE)
        })
        .or_else(|| {
            least_capable(families, |f| {
                f.supports_transfer() && !f.flags.contains(QueueFlags::GRAPHICS)
            })
        })
        .unwrap_or(graphics);

        log::debug!(
            "Queue families selected: graphics={}, compute={}, transfer={}",
            graphics.index(),
            compute.index(),
            transfer.index()
        );

        Ok(Self {
            graphics,
            compute,
            transfer,
        })
    }

    pub fn family(&self, kind: QueueKind) -> QueueFamilyId {
        match kind {
            QueueKind::Graphics => self.graphics,
            QueueKind::Compute => self.compute,
            QueueKind::Transfer => self.transfer,
        }
    }

    /// Whether `kind` runs on a family of its own rather than the graphics family.
    pub fn is_dedicated(&self, kind: QueueKind) -> bool {
        kind == QueueKind::Graphics || self.family(kind) != self.graphics
    }

    /// Whether resources handed from `from` to `to` work need an ownership transfer.
    pub fn requires_ownership_transfer(&self, from: QueueKind, to: QueueKind) -> bool {
        self.family(from) != self.family(to)
    }

    /// Distinct families in use, in ascending order.
    pub fn unique_families(&self) -> Vec<QueueFamilyId> {
        let mut families = vec![self.graphics, self.compute, self.transfer];
        families.sort();
        families.dedup();
        families
    }
}

fn least_capable(
    families: &[QueueFamilyProperties],
    filter: impl Fn(&QueueFamilyProperties) -> bool,
) -> Option<QueueFamilyId> {
    families
        .iter()
        .enumerate()
        .filter(|(_, f)| f.queue_count > 0 && filter(f))
        .min_by_key(|(i, f)| (f.flags.bits().count_ones(), *i))
        .map(|(i, _)| QueueFamilyId(i as u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: QueueFlags, count: u32) -> QueueFamilyProperties {
        QueueFamilyProperties::new(flags, count)
    }

    #[test]
    fn test_discrete_layout_uses_dedicated_families() {
        let families = [
            family(QueueFlags::GRAPHICS | QueueFlags::COMPUTE | QueueFlags::TRANSFER, 16),
            family(QueueFlags::TRANSFER | QueueFlags::SPARSE_BINDING, 2),
            family(QueueFlags::COMPUTE | QueueFlags::TRANSFER, 8),
        ];
        let selection = QueueFamilySelection::select(&families).unwrap();
        assert_eq!(selection.family(QueueKind::Graphics), QueueFamilyId(0));
        assert_eq!(selection.family(QueueKind::Compute), QueueFamilyId(2));
        assert_eq!(selection.family(QueueKind::Transfer), QueueFamilyId(1));
        assert!(selection.is_dedicated(QueueKind::Transfer));
        assert!(selection.requires_ownership_transfer(QueueKind::Graphics, QueueKind::Compute));
        assert_eq!(selection.unique_families().len(), 3);
    }

    #[test]
    fn test_single_family_falls_back_to_graphics() {
        let families = [family(
            QueueFlags::GRAPHICS | QueueFlags::COMPUTE | QueueFlags::TRANSFER,
            1,
        )];
        let selection = QueueFamilySelection::select(&families).unwrap();
        for kind in QueueKind::ALL {
            assert_eq!(selection.family(kind), QueueFamilyId(0));
        }
        assert!(!selection.is_dedicated(QueueKind::Compute));
        assert!(!selection.requires_ownership_transfer(QueueKind::Graphics, QueueKind::Transfer));
        assert_eq!(selection.unique_families(), vec![QueueFamilyId(0)]);
    }

    #[test]
    fn test_transfer_falls_back_to_async_compute() {
        let families = [
            family(QueueFlags::GRAPHICS | QueueFlags::COMPUTE | QueueFlags::TRANSFER, 1),
            family(QueueFlags::COMPUTE, 2),
        ];
        let selection = QueueFamilySelection::select(&families).unwrap();
        assert_eq!(selection.family(QueueKind::Compute), QueueFamilyId(1));
        assert_eq!(selection.family(QueueKind::Transfer), QueueFamilyId(1));
    }

    #[test]
    fn test_graphics_prefers_present_support() {
        let families = [
            family(QueueFlags::GRAPHICS | QueueFlags::COMPUTE, 1).with_present(false),
            family(QueueFlags::GRAPHICS | QueueFlags::COMPUTE | QueueFlags::TRANSFER, 1),
        ];
        let selection = QueueFamilySelection::select(&families).unwrap();
        assert_eq!(selection.family(QueueKind::Graphics), QueueFamilyId(1));
    }

    #[test]
    fn test_no_graphics_family() {
        let families = [family(QueueFlags::COMPUTE | QueueFlags::TRANSFER, 1)];
        let err = QueueFamilySelection::select(&families).unwrap_err();
        assert_eq!(err, GpuError::NoQueueFamily(QueueKind::Graphics));
    }

    #[test]
    fn test_empty_families_are_skipped() {
        let families = [
            family(QueueFlags::GRAPHICS | QueueFlags::COMPUTE | QueueFlags::TRANSFER, 1),
            family(QueueFlags::TRANSFER, 0),
        ];
        let selection = QueueFamilySelection::select(&families).unwrap();
        assert_eq!(selection.family(QueueKind::Transfer), QueueFamilyId(0));
    }
}
