//! Durable edit state.
//!
//! While an edit is in progress its state lives in `.hx/histedit-state`:
//! the commit the next action builds atop, the remaining plan, the keep
//! flag, the original topmost commit, and every replacement recorded so
//! far. The file's presence is the "an edit is in progress" signal; it is
//! removed on completion and by `--abort`.
//!
//! The encoding is a deterministic tagged binary format: a magic header,
//! then one tagged field each for parent, keep, topmost, plan, and
//! replacements. Commit ids are raw 20-byte values, counts and lengths are
//! big-endian u32. Writes go to a temp file first and land with a rename,
//! so a crash never leaves a half-written state behind.

use anyhow::{bail, Context, Result};
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::node::{Node, NODE_LEN};
use crate::plan::{Action, Step};
use crate::replace::Replacement;

/// Live state file; presence indicates an active edit.
pub const STATE_FILE: &str = "histedit-state";
/// Backup of the last plan text the user saved, for recovery.
pub const LAST_EDIT_FILE: &str = "histedit-last-edit.txt";

/// Magic header: format name plus a version byte.
const MAGIC: &[u8; 8] = b"hxstate\x01";

const TAG_PARENT: u8 = b'P';
const TAG_KEEP: u8 = b'K';
const TAG_TOPMOST: u8 = b'T';
const TAG_PLAN: u8 = b'R';
const TAG_REPLACEMENTS: u8 = b'M';

/// Everything needed to resume or abort an in-progress edit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EditState {
    /// The commit the next action builds atop; `None` is the null revision.
    pub parent: Option<Node>,
    /// Remaining plan steps, the suspended one first.
    pub plan: Vec<Step>,
    pub keep: bool,
    /// Working copy parent when the edit started.
    pub topmost: Node,
    /// Replacements recorded so far, in execution order.
    pub replacements: Vec<Replacement>,
}

impl EditState {
    /// Atomically persist to `<meta_dir>/histedit-state`.
    pub fn write(&self, meta_dir: &Path) -> Result<()> {
        let buf = self.encode();
        let tmp = meta_dir.join(format!("{}.tmp", STATE_FILE));
        {
            let mut f = fs::File::create(&tmp)
                .with_context(|| format!("cannot write edit state at {:?}", tmp))?;
            f.write_all(&buf)?;
            f.sync_all()?;
        }
        fs::rename(&tmp, meta_dir.join(STATE_FILE))?;
        Ok(())
    }

    /// Load the state, or `None` when no edit is in progress.
    pub fn read(meta_dir: &Path) -> Result<Option<Self>> {
        let path = meta_dir.join(STATE_FILE);
        let buf = match fs::read(&path) {
            Ok(buf) => buf,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("cannot read edit state at {:?}", path)),
        };
        let state = Self::decode(&buf)
            .with_context(|| format!("edit state file is corrupted: {:?}", path))?;
        Ok(Some(state))
    }

    pub fn exists(meta_dir: &Path) -> bool {
        meta_dir.join(STATE_FILE).exists()
    }

    pub fn clear(meta_dir: &Path) -> Result<()> {
        let path = meta_dir.join(STATE_FILE);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("cannot remove edit state at {:?}", path)),
        }
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(MAGIC);

        buf.push(TAG_PARENT);
        match &self.parent {
            Some(node) => {
                buf.push(1);
                buf.extend_from_slice(node.as_bytes());
            }
            None => buf.push(0),
        }

        buf.push(TAG_KEEP);
        buf.push(self.keep as u8);

        buf.push(TAG_TOPMOST);
        buf.extend_from_slice(self.topmost.as_bytes());

        buf.push(TAG_PLAN);
        buf.extend_from_slice(&(self.plan.len() as u32).to_be_bytes());
        for step in &self.plan {
            buf.push(step.action.code());
            buf.extend_from_slice(step.node.as_bytes());
        }

        buf.push(TAG_REPLACEMENTS);
        buf.extend_from_slice(&(self.replacements.len() as u32).to_be_bytes());
        for (precursor, successors) in &self.replacements {
            buf.extend_from_slice(precursor.as_bytes());
            buf.extend_from_slice(&(successors.len() as u32).to_be_bytes());
            for succ in successors {
                buf.extend_from_slice(succ.as_bytes());
            }
        }

        buf
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        let mut r = Reader { buf, pos: 0 };
        if r.take(MAGIC.len())? != MAGIC.as_slice() {
            bail!("bad magic");
        }

        r.expect_tag(TAG_PARENT)?;
        let parent = match r.u8()? {
            0 => None,
            1 => Some(r.node()?),
            flag => bail!("bad parent flag {}", flag),
        };

        r.expect_tag(TAG_KEEP)?;
        let keep = match r.u8()? {
            0 => false,
            1 => true,
            flag => bail!("bad keep flag {}", flag),
        };

        r.expect_tag(TAG_TOPMOST)?;
        let topmost = r.node()?;

        r.expect_tag(TAG_PLAN)?;
        let count = r.u32()?;
        let mut plan = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let code = r.u8()?;
            let action = Action::from_code(code)
                .with_context(|| format!("bad action code {:#x}", code))?;
            plan.push(Step {
                action,
                node: r.node()?,
            });
        }

        r.expect_tag(TAG_REPLACEMENTS)?;
        let count = r.u32()?;
        let mut replacements = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let precursor = r.node()?;
            let succ_count = r.u32()?;
            let mut successors = Vec::with_capacity(succ_count as usize);
            for _ in 0..succ_count {
                successors.push(r.node()?);
            }
            replacements.push((precursor, successors));
        }

        if r.pos != buf.len() {
            bail!("{} trailing bytes", buf.len() - r.pos);
        }

        Ok(Self {
            parent,
            plan,
            keep,
            topmost,
            replacements,
        })
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            bail!("truncated at byte {}", self.pos);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn node(&mut self) -> Result<Node> {
        let bytes = self.take(NODE_LEN)?;
        let mut arr = [0u8; NODE_LEN];
        arr.copy_from_slice(bytes);
        Ok(Node::from_bytes(arr))
    }

    fn expect_tag(&mut self, tag: u8) -> Result<()> {
        let got = self.u8()?;
        if got != tag {
            bail!("expected tag {:#x}, found {:#x}", tag, got);
        }
        Ok(())
    }
}
