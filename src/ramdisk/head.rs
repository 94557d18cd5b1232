use std::path::PathBuf;

use crate::device::Device;
use crate::error::RamdiskResult;
use crate::layout::Layout;

/// Mount the read-only lower layer of the live overlay.
///
/// With no snapshot layers this is a plain read-only bind of the original
/// directory; otherwise the layers, oldest first, are stacked over it.
pub(crate) fn mount_head(
    device: &dyn Device,
    layout: &Layout,
    snapshot_layers: &[PathBuf],
) -> RamdiskResult<()> {
    if snapshot_layers.is_empty() {
        return device.bind_mount(&layout.orig(), &layout.head(), true);
    }

    let mut lowers = Vec::with_capacity(snapshot_layers.len() + 1);
    lowers.push(layout.orig());
    lowers.extend_from_slice(snapshot_layers);
    device.mount_overlay_readonly(&layout.head(), &lowers)
}
