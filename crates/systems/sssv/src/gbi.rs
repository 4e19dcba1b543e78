//! GBI command builders
//!
//! Every display list record is 64 bits: two big-endian 32-bit words, the
//! command ID in the upper byte of the first word. Builders here return
//! fixed-size record arrays so no call site ever hand-packs bits.
//!
//! # Standard F3DEX records
//!
//! - 0xEE: G_SETPRIMDEPTH - primitive depth in the upper half of word 1
//! - 0xBA: G_SETOTHERMODE_H - other-mode high half update
//! - 0xB1: G_TRI2 - two triangles, 7-bit vertex indices at bits 17, 9, 1
//! - 0xBD: G_POPMTX - pop the modelview stack
//!
//! # Extended records
//!
//! Renderer extension commands start with a header record:
//!
//! ```text
//! word0: [31:24] 0x64 (G_EX_OPCODE) | [23:0] extended command ID
//! word1: inline payload
//! ```
//!
//! Commands that need more than one payload word append continuation
//! records. Record counts are part of the protocol:
//!
//! | Command                | Records |
//! |------------------------|---------|
//! | Enable                 | 2       |
//! | SetRdramExtended       | 1       |
//! | Push/PopOtherMode      | 2       |
//! | Push/PopProjMatrix     | 1       |
//! | MatrixFloat            | 2       |
//! | SetProj/ViewMatrixFloat| 2       |
//! | MatrixGroup            | 4       |
//! | PopMatrixGroup         | 1       |
//! | Vertex                 | 2       |
//! | SetViewportAlign       | 2       |

/// Size of one display list record in bytes
pub const COMMAND_BYTES: u32 = 8;

// F3DEX opcodes
pub const G_SETPRIMDEPTH: u8 = 0xEE;
pub const G_SETOTHERMODE_H: u8 = 0xBA;
pub const G_TRI2: u8 = 0xB1;
pub const G_POPMTX: u8 = 0xBD;

/// G_SETOTHERMODE_H selecting G_MDSFT_TEXTPERSP (shift 19, length 1)
const OTHERMODE_H_TEXTPERSP_W0: u32 = 0xBA13_0001;
/// G_TP_PERSP
const OTHERMODE_H_TP_PERSP: u32 = 1 << 19;

const G_MTX_MODELVIEW: u32 = 0x00;

/// Leading byte of every extended command
pub const G_EX_OPCODE: u8 = 0x64;

/// "RT64" in ASCII, carried by the enable command
pub const G_EX_MAGIC: u32 = 0x5254_3634;
pub const G_EX_VERSION: u32 = 1;

/// Extended command IDs (low 24 bits of the header word)
pub mod ex {
    pub const ENABLE: u32 = 0x00_0001;
    pub const SET_VIEWPORT_ALIGN: u32 = 0x00_0007;
    pub const MATRIX_GROUP: u32 = 0x00_000C;
    pub const POP_MATRIX_GROUP: u32 = 0x00_000D;
    pub const VERTEX: u32 = 0x00_0014;
    pub const PUSH_OTHER_MODE: u32 = 0x00_0019;
    pub const POP_OTHER_MODE: u32 = 0x00_001A;
    pub const PUSH_PROJ_MATRIX: u32 = 0x00_001D;
    pub const POP_PROJ_MATRIX: u32 = 0x00_001E;
    pub const MATRIX_FLOAT: u32 = 0x00_0021;
    pub const SET_PROJ_MATRIX_FLOAT: u32 = 0x00_0022;
    pub const SET_VIEW_MATRIX_FLOAT: u32 = 0x00_0023;
    pub const SET_RDRAM_EXTENDED: u32 = 0x00_0024;
}

// MatrixFloat flag bits, as seen by the matrix handler
pub const MTX_PROJECTION: u8 = 0x01;
pub const MTX_LOAD: u8 = 0x02;
pub const MTX_PUSH: u8 = 0x04;

/// Other-mode halves saved/restored by Push/PopOtherMode
const OTHER_MODE_HL: u32 = 0x3;

/// Matrix element format tag for Set*MatrixFloat continuation records
const MATRIX_F32_COLUMN_MAJOR: u32 = 0x1;

/// Vertex layout tag for the extended vertex command (24-byte vertices)
pub const VERTEX_FORMAT_EX_V1: u32 = 0x1;

/// One 64-bit display list record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GfxCommand {
    pub w0: u32,
    pub w1: u32,
}

impl GfxCommand {
    pub const fn new(w0: u32, w1: u32) -> Self {
        Self { w0, w1 }
    }

    pub fn opcode(&self) -> u8 {
        (self.w0 >> 24) as u8
    }

    /// Extended command ID, if this is an extended header record
    pub fn ex_command(&self) -> Option<u32> {
        if self.opcode() == G_EX_OPCODE {
            Some(self.w0 & 0x00FF_FFFF)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Interpolation {
    None = 0,
    Simple = 1,
}

/// Per-component interpolation choice inside a matrix group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Component {
    Auto = 0,
    Interpolate = 1,
    Skip = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Order {
    Linear = 0,
    Auto = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Edit {
    None = 0,
    Allow = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Aspect {
    Auto = 0,
    Stretch = 1,
    Adjust = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Origin {
    None = 0x000,
    Left = 0x001,
    Center = 0x200,
    Right = 0x400,
}

impl Interpolation {
    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            0 => Some(Interpolation::None),
            1 => Some(Interpolation::Simple),
            _ => None,
        }
    }
}

impl Component {
    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            0 => Some(Component::Auto),
            1 => Some(Component::Interpolate),
            2 => Some(Component::Skip),
            _ => None,
        }
    }
}

impl Origin {
    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            0x000 => Some(Origin::None),
            0x001 => Some(Origin::Left),
            0x200 => Some(Origin::Center),
            0x400 => Some(Origin::Right),
            _ => None,
        }
    }
}

/// Which transform components the renderer interpolates for a group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupComponents {
    pub pos: Component,
    pub rot: Component,
    pub scale: Component,
    pub skew: Component,
    pub persp: Component,
    pub vert: Component,
    pub tile: Component,
    pub uv: Component,
}

impl GroupComponents {
    /// Screen-space sprites: only the vertices (and their UVs) move
    pub const VERTICES_ONLY: Self = Self {
        pos: Component::Skip,
        rot: Component::Skip,
        scale: Component::Skip,
        skew: Component::Skip,
        persp: Component::Skip,
        vert: Component::Interpolate,
        tile: Component::Skip,
        uv: Component::Interpolate,
    };

    fn pack_transform(&self) -> u32 {
        (self.pos as u32) << 24 | (self.rot as u32) << 16 | (self.scale as u32) << 8 | self.skew as u32
    }

    fn pack_geometry(&self) -> u32 {
        (self.persp as u32) << 24 | (self.vert as u32) << 16 | (self.tile as u32) << 8 | self.uv as u32
    }
}

fn decoded<T: std::fmt::Debug>(value: Option<T>) -> String {
    value.map_or_else(|| "?".to_string(), |v| format!("{:?}", v))
}

/// Decoded payload of the commands whose fields matter when reading a dump
fn command_detail(records: &[GfxCommand]) -> Option<String> {
    match (records[0].ex_command()?, records) {
        (ex::MATRIX_GROUP, [head, mode, parts, _]) => {
            let part = |word: u32, shift: u32| decoded(Component::from_bits(word >> shift & 0xFF));
            Some(format!(
                "id={:08X} mode={} pos={} vert={} uv={}",
                head.w1,
                decoded(Interpolation::from_bits(mode.w0)),
                part(parts.w0, 24),
                part(parts.w1, 16),
                part(parts.w1, 0)
            ))
        }
        (ex::SET_VIEWPORT_ALIGN, [head, offsets]) => Some(format!(
            "origin={} offset=({},{})",
            decoded(Origin::from_bits(head.w1)),
            offsets.w0 as u16 as i16,
            offsets.w1 as u16 as i16
        )),
        _ => None,
    }
}

#[inline]
fn ex_header(id: u32, payload: u32) -> GfxCommand {
    GfxCommand::new((G_EX_OPCODE as u32) << 24 | (id & 0x00FF_FFFF), payload)
}

/// Number of records the command starting with `cmd` occupies
pub fn record_count(cmd: &GfxCommand) -> usize {
    match cmd.ex_command() {
        Some(ex::ENABLE)
        | Some(ex::PUSH_OTHER_MODE)
        | Some(ex::POP_OTHER_MODE)
        | Some(ex::MATRIX_FLOAT)
        | Some(ex::SET_PROJ_MATRIX_FLOAT)
        | Some(ex::SET_VIEW_MATRIX_FLOAT)
        | Some(ex::VERTEX)
        | Some(ex::SET_VIEWPORT_ALIGN) => 2,
        Some(ex::MATRIX_GROUP) => 4,
        _ => 1,
    }
}

pub fn set_prim_depth(z: u16, dz: u16) -> GfxCommand {
    GfxCommand::new((G_SETPRIMDEPTH as u32) << 24, (z as u32) << 16 | dz as u32)
}

/// Force G_TP_PERSP so the renderer skips its half-texel rectangle UV fixup
pub fn texture_perspective_on() -> GfxCommand {
    GfxCommand::new(OTHERMODE_H_TEXTPERSP_W0, OTHERMODE_H_TP_PERSP)
}

/// Two triangles; indices are masked to 7 bits
pub fn tri2(first: [u8; 3], second: [u8; 3]) -> GfxCommand {
    let pack = |t: [u8; 3]| {
        ((t[0] as u32 & 0x7F) << 17) | ((t[1] as u32 & 0x7F) << 9) | ((t[2] as u32 & 0x7F) << 1)
    };
    GfxCommand::new((G_TRI2 as u32) << 24 | pack(first), pack(second))
}

pub fn pop_modelview() -> GfxCommand {
    GfxCommand::new((G_POPMTX as u32) << 24, G_MTX_MODELVIEW)
}

pub fn enable() -> [GfxCommand; 2] {
    [
        ex_header(ex::ENABLE, G_EX_MAGIC),
        GfxCommand::new(G_EX_VERSION, 0),
    ]
}

/// Toggle extended (above 8 MB) RDRAM addressing
///
/// Not covered by Push/PopOtherMode; every enable needs a matching disable.
pub fn set_rdram_extended(enabled: bool) -> GfxCommand {
    ex_header(ex::SET_RDRAM_EXTENDED, enabled as u32)
}

pub fn push_other_mode() -> [GfxCommand; 2] {
    [
        ex_header(ex::PUSH_OTHER_MODE, 0),
        GfxCommand::new(OTHER_MODE_HL, 0),
    ]
}

pub fn pop_other_mode() -> [GfxCommand; 2] {
    [
        ex_header(ex::POP_OTHER_MODE, 0),
        GfxCommand::new(OTHER_MODE_HL, 0),
    ]
}

pub fn push_projection_matrix() -> GfxCommand {
    ex_header(ex::PUSH_PROJ_MATRIX, 0)
}

pub fn pop_projection_matrix() -> GfxCommand {
    ex_header(ex::POP_PROJ_MATRIX, 0)
}

/// Encode the MatrixFloat flag byte
///
/// The handler XORs the byte with the push mask before use, so the encoded
/// value is pre-XORed: load+projection encodes as 0x07, push+load+modelview
/// as 0x02.
pub fn matrix_float_params(projection: bool, load: bool, push: bool) -> u8 {
    let mut flags = 0u8;
    if projection {
        flags |= MTX_PROJECTION;
    }
    if load {
        flags |= MTX_LOAD;
    }
    if push {
        flags |= MTX_PUSH;
    }
    flags ^ MTX_PUSH
}

/// Load a float matrix into the standard RSP stacks
pub fn matrix_float(addr: u32, params: u8) -> [GfxCommand; 2] {
    [
        ex_header(ex::MATRIX_FLOAT, params as u32),
        GfxCommand::new(addr, 0),
    ]
}

/// Set the extended projection matrix used for world transforms
pub fn set_proj_matrix_float(addr: u32) -> [GfxCommand; 2] {
    [
        ex_header(ex::SET_PROJ_MATRIX_FLOAT, addr),
        GfxCommand::new(MATRIX_F32_COLUMN_MAJOR, 16),
    ]
}

/// Set the extended view matrix used for world transforms
pub fn set_view_matrix_float(addr: u32) -> [GfxCommand; 2] {
    [
        ex_header(ex::SET_VIEW_MATRIX_FLOAT, addr),
        GfxCommand::new(MATRIX_F32_COLUMN_MAJOR, 16),
    ]
}

/// Declare an interpolation group; `id` correlates the group across frames
#[allow(clippy::too_many_arguments)]
pub fn matrix_group(
    id: u32,
    mode: Interpolation,
    push: bool,
    projection: bool,
    components: GroupComponents,
    order: Order,
    edit: Edit,
    aspect: Aspect,
) -> [GfxCommand; 4] {
    [
        ex_header(ex::MATRIX_GROUP, id),
        GfxCommand::new(mode as u32, (push as u32) << 8 | projection as u32),
        GfxCommand::new(components.pack_transform(), components.pack_geometry()),
        GfxCommand::new(order as u32, (edit as u32) << 8 | aspect as u32),
    ]
}

pub fn pop_matrix_group(count: u8) -> GfxCommand {
    ex_header(ex::POP_MATRIX_GROUP, count as u32)
}

/// Upload `count` extended vertices from `addr` into the buffer at `dest`
pub fn vertex(addr: u32, count: u8, dest: u8) -> [GfxCommand; 2] {
    [
        ex_header(ex::VERTEX, addr),
        GfxCommand::new((count as u32) << 12 | dest as u32, VERTEX_FORMAT_EX_V1),
    ]
}

pub fn set_viewport_align(origin: Origin, offset_x: i16, offset_y: i16) -> [GfxCommand; 2] {
    [
        ex_header(ex::SET_VIEWPORT_ALIGN, origin as u32),
        GfxCommand::new(offset_x as u16 as u32, offset_y as u16 as u32),
    ]
}

/// Human-readable name of the command starting at `cmd`
pub fn command_name(cmd: &GfxCommand) -> &'static str {
    match cmd.ex_command() {
        Some(id) => match id {
            ex::ENABLE => "gEXEnable",
            ex::SET_VIEWPORT_ALIGN => "gEXSetViewportAlign",
            ex::MATRIX_GROUP => "gEXMatrixGroup",
            ex::POP_MATRIX_GROUP => "gEXPopMatrixGroup",
            ex::VERTEX => "gEXVertex",
            ex::PUSH_OTHER_MODE => "gEXPushOtherMode",
            ex::POP_OTHER_MODE => "gEXPopOtherMode",
            ex::PUSH_PROJ_MATRIX => "gEXPushProjectionMatrix",
            ex::POP_PROJ_MATRIX => "gEXPopProjectionMatrix",
            ex::MATRIX_FLOAT => "gEXMatrixFloat",
            ex::SET_PROJ_MATRIX_FLOAT => "gEXSetProjMatrixFloat",
            ex::SET_VIEW_MATRIX_FLOAT => "gEXSetViewMatrixFloat",
            ex::SET_RDRAM_EXTENDED => "gEXSetRDRAMExtended",
            _ => "gEX?",
        },
        None => match cmd.opcode() {
            G_SETPRIMDEPTH => "G_SETPRIMDEPTH",
            G_SETOTHERMODE_H => "G_SETOTHERMODE_H",
            G_TRI2 => "G_TRI2",
            G_POPMTX => "G_POPMTX",
            _ => "G_?",
        },
    }
}

/// Render a record stream one command per line
pub fn disassemble(cmds: &[GfxCommand]) -> Vec<String> {
    let mut lines = Vec::new();
    let mut i = 0;
    while i < cmds.len() {
        let count = record_count(&cmds[i]).min(cmds.len() - i);
        let words: Vec<String> = cmds[i..i + count]
            .iter()
            .map(|c| format!("{:08X} {:08X}", c.w0, c.w1))
            .collect();
        let mut line = format!(
            "{:3}: {:<24} {}",
            i,
            command_name(&cmds[i]),
            words.join(" | ")
        );
        if let Some(detail) = command_detail(&cmds[i..i + count]) {
            line.push_str(&format!("  ; {}", detail));
        }
        lines.push(line);
        i += count;
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tri2_index_packing() {
        let cmd = tri2([0, 1, 3], [0, 3, 2]);
        assert_eq!(cmd.w0, 0xB100_0000 | (1 << 9) | (3 << 1));
        assert_eq!(cmd.w1, (3 << 9) | (2 << 1));
        assert_eq!(cmd.opcode(), G_TRI2);
    }

    #[test]
    fn test_tri2_masks_to_seven_bits() {
        let cmd = tri2([0xFF, 0, 0], [0, 0, 0]);
        assert_eq!(cmd.w0, 0xB100_0000 | (0x7F << 17));
    }

    #[test]
    fn test_matrix_float_params_pre_xor() {
        assert_eq!(matrix_float_params(true, true, false), 0x07);
        assert_eq!(matrix_float_params(false, true, true), 0x02);
        // Round trip through the handler's XOR
        assert_eq!(matrix_float_params(true, true, false) ^ MTX_PUSH, MTX_LOAD | MTX_PROJECTION);
    }

    #[test]
    fn test_prim_depth_layout() {
        let cmd = set_prim_depth(0x1234, 0);
        assert_eq!(cmd.w0, 0xEE00_0000);
        assert_eq!(cmd.w1, 0x1234_0000);
    }

    #[test]
    fn test_texture_perspective_override_words() {
        let cmd = texture_perspective_on();
        assert_eq!(cmd.w0, 0xBA13_0001);
        assert_eq!(cmd.w1, 0x0008_0000);
    }

    #[test]
    fn test_extended_header() {
        let cmd = set_rdram_extended(true);
        assert_eq!(cmd.w0, 0x6400_0024);
        assert_eq!(cmd.w1, 1);
        assert_eq!(cmd.ex_command(), Some(ex::SET_RDRAM_EXTENDED));
        assert_eq!(pop_modelview().ex_command(), None);
    }

    #[test]
    fn test_record_counts_match_builders() {
        assert_eq!(record_count(&enable()[0]), enable().len());
        assert_eq!(record_count(&push_other_mode()[0]), 2);
        assert_eq!(record_count(&matrix_float(0, 0)[0]), 2);
        assert_eq!(record_count(&set_proj_matrix_float(0)[0]), 2);
        assert_eq!(record_count(&vertex(0, 4, 0)[0]), 2);
        let group = matrix_group(
            1,
            Interpolation::Simple,
            true,
            false,
            GroupComponents::VERTICES_ONLY,
            Order::Linear,
            Edit::None,
            Aspect::Auto,
        );
        assert_eq!(record_count(&group[0]), group.len());
        assert_eq!(record_count(&pop_matrix_group(0)), 1);
        assert_eq!(record_count(&tri2([0, 1, 2], [0, 2, 3])), 1);
    }

    #[test]
    fn test_matrix_group_carries_id_and_flags() {
        let group = matrix_group(
            0xCAFE_F00D,
            Interpolation::Simple,
            true,
            false,
            GroupComponents::VERTICES_ONLY,
            Order::Linear,
            Edit::None,
            Aspect::Auto,
        );
        assert_eq!(group[0].w1, 0xCAFE_F00D);
        assert_eq!(group[1], GfxCommand::new(1, 0x100));
        assert_eq!(group[2].w0, 0x0202_0202);
        assert_eq!(group[2].w1, 0x0201_0201);
    }

    #[test]
    fn test_vertex_command() {
        let v = vertex(0x8090_0080, 4, 0);
        assert_eq!(v[0].w1, 0x8090_0080);
        assert_eq!(v[1].w0, 4 << 12);
        assert_eq!(v[1].w1, VERTEX_FORMAT_EX_V1);
    }

    #[test]
    fn test_disassemble_groups_continuations() {
        let mut cmds = Vec::new();
        cmds.extend_from_slice(&enable());
        cmds.push(set_rdram_extended(false));
        cmds.push(tri2([0, 1, 2], [0, 2, 3]));
        let lines = disassemble(&cmds);
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("gEXEnable"));
        assert!(lines[1].contains("gEXSetRDRAMExtended"));
        assert!(lines[2].contains("G_TRI2"));
    }

    #[test]
    fn test_disassemble_decodes_group_and_alignment() {
        let mut cmds = Vec::new();
        cmds.extend_from_slice(&matrix_group(
            0xCAFE_F00D,
            Interpolation::Simple,
            true,
            false,
            GroupComponents::VERTICES_ONLY,
            Order::Linear,
            Edit::None,
            Aspect::Auto,
        ));
        cmds.extend_from_slice(&set_viewport_align(Origin::Right, -8, 4));
        let lines = disassemble(&cmds);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("; id=CAFEF00D mode=Simple pos=Skip vert=Interpolate uv=Interpolate"));
        assert!(lines[1].ends_with("; origin=Right offset=(-8,4)"));

        // Truncated group: no detail rather than a bad read
        let lines = disassemble(&cmds[..2]);
        assert!(!lines[0].contains(';'));
    }

    #[test]
    fn test_field_decoding() {
        assert_eq!(Interpolation::from_bits(0), Some(Interpolation::None));
        assert_eq!(Interpolation::from_bits(7), None);
        assert_eq!(Component::from_bits(0), Some(Component::Auto));
        assert_eq!(Component::from_bits(3), None);
        for origin in [Origin::None, Origin::Left, Origin::Center, Origin::Right] {
            assert_eq!(Origin::from_bits(origin as u32), Some(origin));
        }
        assert_eq!(Origin::from_bits(0x100), None);
    }
}
