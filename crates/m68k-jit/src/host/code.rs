//! Micro-op code buffer, the reference [`Builder`] backend.
//!
//! Every host instruction occupies exactly one slot, so a "native pointer"
//! is a slot index and patching an entry never shifts the code after it.
//! Branch displacements are relative to the slot after the branch.

use super::builder::{
    AluOp, BitOp, Builder, CodePtr, Count, HostCond, HostEa, HostReg, OpSize, ShiftOp, UnaryOp,
};
use crate::runtime::Helper;

/// One host instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOp {
    Mov { src: HostEa, dst: HostEa, size: OpSize },
    Movsx { src: HostEa, dst: HostReg, from: OpSize, to: OpSize },
    Movzx { src: HostEa, dst: HostReg, from: OpSize, to: OpSize },
    Alu { op: AluOp, src: HostEa, dst: HostEa, size: OpSize },
    Unary { op: UnaryOp, dst: HostEa, size: OpSize },
    Shift { op: ShiftOp, count: Count, dst: HostEa, size: OpSize },
    Bit { op: BitOp, bit: HostEa, dst: HostEa, size: OpSize },
    SetCc { cond: HostCond, dst: HostEa },
    Lea { base: HostReg, disp: i32, dst: HostReg },
    Jcc { cond: HostCond, rel: i32 },
    Jmp { rel: i32 },
    JmpReg(HostReg),
    Call { rel: i32 },
    Ret,
    Push(HostReg),
    Pop(HostReg),
    CallHelper(Helper),
}

impl HostOp {
    /// Absolute target of a relative branch sitting at `at`.
    #[must_use]
    pub fn branch_target(&self, at: CodePtr) -> Option<CodePtr> {
        match *self {
            Self::Jcc { rel, .. } | Self::Jmp { rel } | Self::Call { rel } => {
                Some(CodePtr(at.0.wrapping_add(1).wrapping_add(rel as u32)))
            }
            _ => None,
        }
    }
}

fn rel_to(site: CodePtr, target: CodePtr) -> i32 {
    target.0.wrapping_sub(site.0 + 1) as i32
}

/// Growable buffer of [`HostOp`]s.
#[derive(Debug, Default)]
pub struct CodeBuffer {
    ops: Vec<HostOp>,
    /// Set while [`Builder::rewrite`] is overwriting existing code.
    cursor: Option<usize>,
    /// Slots changed in place since the last [`CodeBuffer::take_rewrites`],
    /// kept only once tracking is on.
    rewrites: Option<Vec<u32>>,
}

impl CodeBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    #[must_use]
    pub fn op(&self, at: CodePtr) -> Option<HostOp> {
        self.ops.get(at.index()).copied()
    }

    /// Record every slot overwritten by [`Builder::rewrite`] or
    /// [`Builder::patch_branch`], for backends that mirror this buffer.
    pub fn track_rewrites(&mut self) {
        self.rewrites.get_or_insert_with(Vec::new);
    }

    /// Slots overwritten since the previous call.
    pub fn take_rewrites(&mut self) -> Vec<u32> {
        self.rewrites.as_mut().map(std::mem::take).unwrap_or_default()
    }

    fn mark_rewritten(&mut self, pos: usize) {
        if let Some(rewrites) = self.rewrites.as_mut() {
            rewrites.push(pos as u32);
        }
    }

    fn emit(&mut self, op: HostOp) -> CodePtr {
        match self.cursor {
            Some(pos) => {
                if let Some(slot) = self.ops.get_mut(pos) {
                    *slot = op;
                    self.mark_rewritten(pos);
                } else {
                    self.ops.push(op);
                }
                self.cursor = Some(pos + 1);
                CodePtr(pos as u32)
            }
            None => {
                self.ops.push(op);
                CodePtr(self.ops.len() as u32 - 1)
            }
        }
    }
}

impl Builder for CodeBuffer {
    fn here(&self) -> CodePtr {
        CodePtr(self.cursor.unwrap_or(self.ops.len()) as u32)
    }

    fn mov(&mut self, src: HostEa, dst: HostEa, size: OpSize) {
        self.emit(HostOp::Mov { src, dst, size });
    }

    fn movsx(&mut self, src: HostEa, dst: HostReg, from: OpSize, to: OpSize) {
        self.emit(HostOp::Movsx { src, dst, from, to });
    }

    fn movzx(&mut self, src: HostEa, dst: HostReg, from: OpSize, to: OpSize) {
        self.emit(HostOp::Movzx { src, dst, from, to });
    }

    fn alu(&mut self, op: AluOp, src: HostEa, dst: HostEa, size: OpSize) {
        self.emit(HostOp::Alu { op, src, dst, size });
    }

    fn unary(&mut self, op: UnaryOp, dst: HostEa, size: OpSize) {
        self.emit(HostOp::Unary { op, dst, size });
    }

    fn shift(&mut self, op: ShiftOp, count: Count, dst: HostEa, size: OpSize) {
        self.emit(HostOp::Shift { op, count, dst, size });
    }

    fn bit(&mut self, op: BitOp, bit: HostEa, dst: HostEa, size: OpSize) {
        self.emit(HostOp::Bit { op, bit, dst, size });
    }

    fn setcc(&mut self, cond: HostCond, dst: HostEa) {
        self.emit(HostOp::SetCc { cond, dst });
    }

    fn lea(&mut self, base: HostReg, disp: i32, dst: HostReg) {
        self.emit(HostOp::Lea { base, disp, dst });
    }

    fn jcc(&mut self, cond: HostCond, target: Option<CodePtr>) -> CodePtr {
        let site = self.here();
        let rel = target.map_or(0, |target| rel_to(site, target));
        self.emit(HostOp::Jcc { cond, rel })
    }

    fn jmp(&mut self, target: Option<CodePtr>) -> CodePtr {
        let site = self.here();
        let rel = target.map_or(0, |target| rel_to(site, target));
        self.emit(HostOp::Jmp { rel })
    }

    fn jmp_reg(&mut self, reg: HostReg) {
        self.emit(HostOp::JmpReg(reg));
    }

    fn call(&mut self, target: CodePtr) {
        let site = self.here();
        self.emit(HostOp::Call {
            rel: rel_to(site, target),
        });
    }

    fn ret(&mut self) {
        self.emit(HostOp::Ret);
    }

    fn push(&mut self, reg: HostReg) {
        self.emit(HostOp::Push(reg));
    }

    fn pop(&mut self, reg: HostReg) {
        self.emit(HostOp::Pop(reg));
    }

    fn call_helper(&mut self, helper: Helper) {
        self.emit(HostOp::CallHelper(helper));
    }

    fn patch_branch(&mut self, site: CodePtr, target: CodePtr) {
        let rel = rel_to(site, target);
        if let Some(op) = self.ops.get_mut(site.index()) {
            match op {
                HostOp::Jcc { rel: old, .. } | HostOp::Jmp { rel: old } | HostOp::Call { rel: old } => {
                    *old = rel;
                }
                other => {
                    log::error!("patching non-branch {other:?} at {}", site.0);
                    return;
                }
            }
            self.mark_rewritten(site.index());
        }
    }

    fn rewrite<F>(&mut self, at: CodePtr, emit: F)
    where
        F: FnOnce(&mut Self),
    {
        let saved = self.cursor.replace(at.index());
        emit(self);
        self.cursor = saved;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_branch_is_patched_relative_to_next_slot() {
        let mut code = CodeBuffer::new();
        let site = code.jmp(None);
        code.ret();
        code.ret();
        let target = code.here();
        code.patch_branch(site, target);
        assert_eq!(code.op(site), Some(HostOp::Jmp { rel: 2 }));
        assert_eq!(code.op(site).and_then(|op| op.branch_target(site)), Some(target));
    }

    #[test]
    fn backward_branch_has_negative_displacement() {
        let mut code = CodeBuffer::new();
        let top = code.here();
        code.ret();
        let site = code.jcc(HostCond::Equal, Some(top));
        assert_eq!(code.op(site), Some(HostOp::Jcc { cond: HostCond::Equal, rel: -2 }));
    }

    #[test]
    fn rewrite_overwrites_in_place() {
        let mut code = CodeBuffer::new();
        code.ret();
        code.ret();
        code.ret();
        code.rewrite(CodePtr(1), |code| {
            code.push(HostReg(3));
            assert_eq!(code.here(), CodePtr(2));
        });
        assert_eq!(code.len(), 3);
        assert_eq!(code.op(CodePtr(1)), Some(HostOp::Push(HostReg(3))));
        assert_eq!(code.here(), CodePtr(3));
    }

    #[test]
    fn rewrites_are_recorded_once_tracking_is_on() {
        let mut code = CodeBuffer::new();
        let site = code.jmp(None);
        code.ret();
        code.patch_branch(site, CodePtr(2));
        assert!(code.take_rewrites().is_empty());

        code.track_rewrites();
        code.ret();
        code.patch_branch(site, CodePtr(1));
        code.rewrite(CodePtr(1), |code| code.push(HostReg(0)));
        assert_eq!(code.take_rewrites(), vec![0, 1]);
        assert!(code.take_rewrites().is_empty());
    }
}
