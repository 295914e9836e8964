//! Static device-tree templates.
//!
//! Each platform model maps to one read-only forest of named nodes. The
//! nodes are descriptive metadata only: they pre-declare naming and parent
//! relationships, they are not devices themselves. Node names follow the
//! `sam:dd:cc:tt:ii:ff` scheme; a node whose name does not parse as a UID
//! (the root) never materializes as a device.

use std::ptr;

use sam_core::uid::DeviceUid;

pub struct SoftwareNode {
    pub name: &'static str,
    pub parent: Option<&'static SoftwareNode>,
}

impl SoftwareNode {
    /// The UID this node names, if it names a device at all.
    pub fn uid(&self) -> Option<DeviceUid> {
        self.name.parse().ok()
    }
}

pub type NodeGroup = &'static [&'static SoftwareNode];

/* Root node. */
pub static NODE_ROOT: SoftwareNode = SoftwareNode {
    name: "sam_platform_hub",
    parent: None,
};

/* Detachable-subsystem device hub (keyboard/touchpad docking cover). */
pub static NODE_HUB_KIP: SoftwareNode = SoftwareNode {
    name: "sam:01:0e:01:00:00",
    parent: Some(&NODE_ROOT),
};

/* AC adapter. */
pub static NODE_BAT_AC: SoftwareNode = SoftwareNode {
    name: "sam:01:02:01:01:01",
    parent: Some(&NODE_ROOT),
};

/* Primary battery. */
pub static NODE_BAT_MAIN: SoftwareNode = SoftwareNode {
    name: "sam:01:02:01:01:00",
    parent: Some(&NODE_ROOT),
};

/* Secondary battery, managed via the KIP hub. */
pub static NODE_BAT_KIP: SoftwareNode = SoftwareNode {
    name: "sam:01:02:02:01:00",
    parent: Some(&NODE_HUB_KIP),
};

/* Platform profile / performance-mode device. */
pub static NODE_TMP_PPROF: SoftwareNode = SoftwareNode {
    name: "sam:01:03:01:00:01",
    parent: Some(&NODE_ROOT),
};

/* Tablet-mode switch via the KIP subsystem. */
pub static NODE_KIP_TABLET_SWITCH: SoftwareNode = SoftwareNode {
    name: "sam:01:0e:01:00:01",
    parent: Some(&NODE_ROOT),
};

/* Detachment-system device. */
pub static NODE_BAS_DTX: SoftwareNode = SoftwareNode {
    name: "sam:01:11:01:00:00",
    parent: Some(&NODE_ROOT),
};

/* HID keyboard (target 1). */
pub static NODE_HID_TID1_KEYBOARD: SoftwareNode = SoftwareNode {
    name: "sam:01:15:01:01:00",
    parent: Some(&NODE_ROOT),
};

/* HID pen stash (target 1). */
pub static NODE_HID_TID1_PENSTASH: SoftwareNode = SoftwareNode {
    name: "sam:01:15:01:02:00",
    parent: Some(&NODE_ROOT),
};

/* HID touchpad (target 1). */
pub static NODE_HID_TID1_TOUCHPAD: SoftwareNode = SoftwareNode {
    name: "sam:01:15:01:03:00",
    parent: Some(&NODE_ROOT),
};

/* HID device instance 6 (target 1). */
pub static NODE_HID_TID1_IID6: SoftwareNode = SoftwareNode {
    name: "sam:01:15:01:06:00",
    parent: Some(&NODE_ROOT),
};

/* HID device instance 7 (target 1). */
pub static NODE_HID_TID1_IID7: SoftwareNode = SoftwareNode {
    name: "sam:01:15:01:07:00",
    parent: Some(&NODE_ROOT),
};

/* HID system controls (target 1). */
pub static NODE_HID_TID1_SYSCTRL: SoftwareNode = SoftwareNode {
    name: "sam:01:15:01:08:00",
    parent: Some(&NODE_ROOT),
};

/* HID keyboard. */
pub static NODE_HID_MAIN_KEYBOARD: SoftwareNode = SoftwareNode {
    name: "sam:01:15:02:01:00",
    parent: Some(&NODE_ROOT),
};

/* HID touchpad. */
pub static NODE_HID_MAIN_TOUCHPAD: SoftwareNode = SoftwareNode {
    name: "sam:01:15:02:03:00",
    parent: Some(&NODE_ROOT),
};

/* HID device instance 5. */
pub static NODE_HID_MAIN_IID5: SoftwareNode = SoftwareNode {
    name: "sam:01:15:02:05:00",
    parent: Some(&NODE_ROOT),
};

/* HID keyboard behind the KIP hub. */
pub static NODE_HID_KIP_KEYBOARD: SoftwareNode = SoftwareNode {
    name: "sam:01:15:02:01:00",
    parent: Some(&NODE_HUB_KIP),
};

/* HID pen stash behind the KIP hub. */
pub static NODE_HID_KIP_PENSTASH: SoftwareNode = SoftwareNode {
    name: "sam:01:15:02:02:00",
    parent: Some(&NODE_HUB_KIP),
};

/* HID touchpad behind the KIP hub. */
pub static NODE_HID_KIP_TOUCHPAD: SoftwareNode = SoftwareNode {
    name: "sam:01:15:02:03:00",
    parent: Some(&NODE_HUB_KIP),
};

/* HID device instance 5 behind the KIP hub. */
pub static NODE_HID_KIP_IID5: SoftwareNode = SoftwareNode {
    name: "sam:01:15:02:05:00",
    parent: Some(&NODE_HUB_KIP),
};

/* HID device instance 6 behind the KIP hub. */
pub static NODE_HID_KIP_IID6: SoftwareNode = SoftwareNode {
    name: "sam:01:15:02:06:00",
    parent: Some(&NODE_HUB_KIP),
};

/* Devices for 5th- and 6th-generation models. */
pub static NODE_GROUP_GEN5: NodeGroup = &[&NODE_ROOT, &NODE_TMP_PPROF];

/* Devices for the detachable-book line, generation 3. */
pub static NODE_GROUP_SB3: NodeGroup = &[
    &NODE_ROOT,
    &NODE_HUB_KIP,
    &NODE_BAT_AC,
    &NODE_BAT_MAIN,
    &NODE_BAT_KIP,
    &NODE_TMP_PPROF,
    &NODE_BAS_DTX,
    &NODE_HID_KIP_KEYBOARD,
    &NODE_HID_KIP_TOUCHPAD,
    &NODE_HID_KIP_IID5,
    &NODE_HID_KIP_IID6,
];

/* Devices for laptop generations 3 and 4. */
pub static NODE_GROUP_SL3: NodeGroup = &[
    &NODE_ROOT,
    &NODE_BAT_AC,
    &NODE_BAT_MAIN,
    &NODE_TMP_PPROF,
    &NODE_HID_MAIN_KEYBOARD,
    &NODE_HID_MAIN_TOUCHPAD,
    &NODE_HID_MAIN_IID5,
];

/* Devices for the studio laptop. */
pub static NODE_GROUP_SLS: NodeGroup = &[
    &NODE_ROOT,
    &NODE_BAT_AC,
    &NODE_BAT_MAIN,
    &NODE_TMP_PPROF,
    &NODE_HID_TID1_KEYBOARD,
    &NODE_HID_TID1_PENSTASH,
    &NODE_HID_TID1_TOUCHPAD,
    &NODE_HID_TID1_IID6,
    &NODE_HID_TID1_IID7,
    &NODE_HID_TID1_SYSCTRL,
];

/* Devices for the go-line laptop. */
pub static NODE_GROUP_SLG1: NodeGroup = &[
    &NODE_ROOT,
    &NODE_BAT_AC,
    &NODE_BAT_MAIN,
    &NODE_TMP_PPROF,
];

/* Devices for tablet generation 7. */
pub static NODE_GROUP_SP7: NodeGroup = &[
    &NODE_ROOT,
    &NODE_BAT_AC,
    &NODE_BAT_MAIN,
    &NODE_TMP_PPROF,
];

/* Devices for tablet generation 8. */
pub static NODE_GROUP_SP8: NodeGroup = &[
    &NODE_ROOT,
    &NODE_HUB_KIP,
    &NODE_BAT_AC,
    &NODE_BAT_MAIN,
    &NODE_TMP_PPROF,
    &NODE_KIP_TABLET_SWITCH,
    &NODE_HID_KIP_KEYBOARD,
    &NODE_HID_KIP_PENSTASH,
    &NODE_HID_KIP_TOUCHPAD,
    &NODE_HID_KIP_IID5,
];

/// Platform-model match table, keyed by firmware hardware id.
pub fn node_group_for_model(model: &str) -> Option<NodeGroup> {
    Some(match model {
        // Tablet generations 4 through 6, book 2, laptops 1 and 2.
        "MSHW0081" | "MSHW0111" | "MSHW0107" | "MSHW0086" | "MSHW0112" => NODE_GROUP_GEN5,
        // Tablet generation 7 variants.
        "MSHW0116" | "MSHW0119" => NODE_GROUP_SP7,
        // Tablet generation 8.
        "MSHW0263" => NODE_GROUP_SP8,
        // Detachable book 3.
        "MSHW0117" => NODE_GROUP_SB3,
        // Laptops 3 and 4.
        "MSHW0114" | "MSHW0110" | "MSHW0250" => NODE_GROUP_SL3,
        // Laptop go 1.
        "MSHW0118" => NODE_GROUP_SLG1,
        // Studio laptop.
        "MSHW0123" => NODE_GROUP_SLS,
        _ => return None,
    })
}

/// Children of `parent` within `group`, in group order.
pub fn children_of(
    group: NodeGroup,
    parent: &'static SoftwareNode,
) -> impl Iterator<Item = &'static SoftwareNode> {
    group
        .iter()
        .copied()
        .filter(move |node| node.parent.is_some_and(|p| ptr::eq(p, parent)))
}

/// The node in `group` that names `uid`, if any.
pub fn node_for_uid(group: NodeGroup, uid: DeviceUid) -> Option<&'static SoftwareNode> {
    group.iter().copied().find(|node| node.uid() == Some(uid))
}
