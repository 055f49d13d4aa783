//! Decoder checks against a reference table of encodings.

use m68k_inst::{
    decode, try_decode, Condition, CpuModel, DecodeError, Extra, FullIndex, IndexReg, Instruction,
    MemoryIndirect, Op, Operand, Size, Variant,
};
use pretty_assertions::assert_eq;

fn dec(words: &[u16]) -> Instruction {
    decode(words, 0, CpuModel::M68000)
}

/// (words, byte length, operation)
const TABLE: &[(&[u16], u8, Op)] = &[
    // NOP
    (&[0x4E71], 2, Op::Nop),
    // MOVEQ #1,D0
    (&[0x7001], 2, Op::Move),
    // MOVE.L #$12345678,D0
    (&[0x203C, 0x1234, 0x5678], 6, Op::Move),
    // MOVE.W $10(A0),$20(A1)
    (&[0x3368, 0x0010, 0x0020], 6, Op::Move),
    // MOVE.B ($1234).W,($00FF0000).L
    (&[0x13F8, 0x1234, 0x00FF, 0x0000], 8, Op::Move),
    // MOVE.L ($12345678).L,($9ABCDEF0).L
    (&[0x23F9, 0x1234, 0x5678, 0x9ABC, 0xDEF0], 10, Op::Move),
    // ADDI.L #$10000,D3
    (&[0x0683, 0x0001, 0x0000], 6, Op::Add),
    // ORI #$0700,SR
    (&[0x007C, 0x0700], 4, Op::OriSr),
    // ANDI #$FE,CCR
    (&[0x023C, 0x00FE], 4, Op::AndiCcr),
    // BTST D1,(A0)
    (&[0x0310], 2, Op::Btst),
    // BSET #7,$10(A0)
    (&[0x08E8, 0x0007, 0x0010], 6, Op::Bset),
    // MOVEP.W $4(A0),D0
    (&[0x0108, 0x0004], 4, Op::Movep),
    // LEA $10(PC),A0
    (&[0x41FA, 0x0010], 4, Op::Lea),
    // PEA (A0)
    (&[0x4850], 2, Op::Pea),
    // CLR.L -(A7)
    (&[0x42A7], 2, Op::Clr),
    // TST.B (A0)+
    (&[0x4A18], 2, Op::Tst),
    // TAS (A0)
    (&[0x4AD0], 2, Op::Tas),
    // MOVEM.L D0-D7/A0-A6,-(A7)
    (&[0x48E7, 0xFFFE], 4, Op::Movem),
    // MOVEM.W $100(A0),D0/D1
    (&[0x4CA8, 0x0003, 0x0100], 6, Op::Movem),
    // JSR ($1000).W
    (&[0x4EB8, 0x1000], 4, Op::Jsr),
    // JMP (A0)
    (&[0x4ED0], 2, Op::Jmp),
    // RTS / RTE / RTR / TRAPV / RESET
    (&[0x4E75], 2, Op::Rts),
    (&[0x4E73], 2, Op::Rte),
    (&[0x4E77], 2, Op::Rtr),
    (&[0x4E76], 2, Op::Trapv),
    (&[0x4E70], 2, Op::Reset),
    // STOP #$2000
    (&[0x4E72, 0x2000], 4, Op::Stop),
    // TRAP #15
    (&[0x4E4F], 2, Op::Trap),
    // LINK A6,#-8 / UNLK A6
    (&[0x4E56, 0xFFF8], 4, Op::Link),
    (&[0x4E5E], 2, Op::Unlk),
    // MOVE A0,USP
    (&[0x4E60], 2, Op::MoveUsp),
    // MOVE SR,D0 / MOVE D0,CCR / MOVE #$2700,SR
    (&[0x40C0], 2, Op::MoveFromSr),
    (&[0x44C0], 2, Op::MoveCcr),
    (&[0x46FC, 0x2700], 4, Op::MoveSr),
    // SWAP D0 / EXT.W D0 / EXT.L D0
    (&[0x4840], 2, Op::Swap),
    (&[0x4880], 2, Op::Ext),
    (&[0x48C0], 2, Op::Ext),
    // NBCD D0 / NEGX.W D0 / NEG.B D0 / NOT.L D0
    (&[0x4800], 2, Op::Nbcd),
    (&[0x4040], 2, Op::Negx),
    (&[0x4400], 2, Op::Neg),
    (&[0x4680], 2, Op::Not),
    // CHK.W (A0),D1
    (&[0x4390], 2, Op::Chk),
    // ILLEGAL
    (&[0x4AFC], 2, Op::Illegal),
    // ADDQ.W #8,A0 / SUBQ.L #1,D0
    (&[0x5048], 2, Op::Add),
    (&[0x5380], 2, Op::Sub),
    // SEQ D0 / DBRA D0,*
    (&[0x57C0], 2, Op::Scc),
    (&[0x51C8, 0xFFFE], 4, Op::Dbcc),
    // BRA.S / BNE.W / BSR.W
    (&[0x6002], 2, Op::Bcc),
    (&[0x6600, 0x0100], 4, Op::Bcc),
    (&[0x6100, 0x0010], 4, Op::Bsr),
    // DIVU.W D1,D0 / DIVS.W #3,D0
    (&[0x80C1], 2, Op::Divu),
    (&[0x81FC, 0x0003], 4, Op::Divs),
    // SBCD D1,D0 / SBCD -(A1),-(A0)
    (&[0x8101], 2, Op::Sbcd),
    (&[0x8109], 2, Op::Sbcd),
    // OR.W D0,(A0)
    (&[0x8150], 2, Op::Or),
    // SUB.L (A0),D0 / SUBX.L D1,D0 / SUBA.W D0,A0
    (&[0x9090], 2, Op::Sub),
    (&[0x9181], 2, Op::Subx),
    (&[0x90C0], 2, Op::Sub),
    // line A / line F
    (&[0xA000], 2, Op::ALineTrap),
    (&[0xF000], 2, Op::FLineTrap),
    // CMP.W D1,D0 / CMPA.L A1,A0 / CMPM.L (A1)+,(A0)+ / EOR.B D0,D1
    (&[0xB041], 2, Op::Cmp),
    (&[0xB1C9], 2, Op::Cmp),
    (&[0xB189], 2, Op::Cmp),
    (&[0xB101], 2, Op::Eor),
    // MULU.W D1,D0 / MULS.W (A0),D0 / ABCD D1,D0
    (&[0xC0C1], 2, Op::Mulu),
    (&[0xC1D0], 2, Op::Muls),
    (&[0xC101], 2, Op::Abcd),
    // EXG D0,D1 / EXG A0,A1 / EXG D0,A1
    (&[0xC141], 2, Op::Exg),
    (&[0xC149], 2, Op::Exg),
    (&[0xC189], 2, Op::Exg),
    // AND.L #$FF,D0
    (&[0xC0BC, 0x0000, 0x00FF], 6, Op::And),
    // ADD.B D0,(A0)+ / ADDX.W -(A1),-(A0) / ADDA.L #1,A0
    (&[0xD118], 2, Op::Add),
    (&[0xD149], 2, Op::Addx),
    (&[0xD1FC, 0x0000, 0x0001], 6, Op::Add),
    // ASL.W #1,D0 / LSR.L D1,D0 / ROXL.B #8,D2 / ROR.W (A0)
    (&[0xE340], 2, Op::Asl),
    (&[0xE2A8], 2, Op::Lsr),
    (&[0xE112], 2, Op::Roxl),
    (&[0xE6D0], 2, Op::Ror),
];

#[test]
fn reference_table_lengths() {
    for &(words, length, op) in TABLE {
        let inst = dec(words);
        assert_eq!((inst.op, inst.length), (op, length), "decoding {words:04X?}");
        assert_eq!(usize::from(inst.length), words.len() * 2, "{words:04X?}");
    }
}

#[test]
fn move_fields_re_encode_to_the_opcode() {
    for &(words, _, op) in TABLE {
        let inst = dec(words);
        if op != Op::Move || inst.variant == Variant::Quick {
            continue;
        }
        let size = inst.size().expect("move has a size");
        let (dst_mode, dst_reg) = inst.dst.mode_reg().expect("ea destination");
        let src = inst.src.ea_bits().expect("ea source");
        let opcode = (size.move_bits() << 12)
            | (u16::from(dst_reg) << 9)
            | (u16::from(dst_mode) << 6)
            | src;
        assert_eq!(opcode, words[0], "{inst}");
    }
}

#[test]
fn alu_fields_re_encode_to_the_opcode() {
    // ADD.B D0,(A0)+
    let inst = dec(&[0xD118]);
    let ea = inst.dst.ea_bits().expect("ea");
    let Operand::DataReg(reg) = inst.src else {
        panic!("register source expected");
    };
    let size = inst.size().expect("size");
    assert_eq!(0xD100 | (u16::from(reg) << 9) | (size.bits() << 6) | ea, 0xD118);

    // SUB.L (A0),D0
    let inst = dec(&[0x9090]);
    let Operand::DataReg(reg) = inst.dst else {
        panic!("register destination expected");
    };
    let size = inst.size().expect("size");
    let ea = inst.src.ea_bits().expect("ea");
    assert_eq!(0x9000 | (u16::from(reg) << 9) | (size.bits() << 6) | ea, 0x9090);
}

#[test]
fn branch_targets_for_each_displacement_width() {
    let byte = decode(&[0x6604], 0x400, CpuModel::M68000);
    assert_eq!(byte.variant, Variant::Byte);
    assert_eq!(byte.branch_target(), Some(0x406));

    let word = decode(&[0x6700, 0xFFF0], 0x400, CpuModel::M68000);
    assert_eq!(word.variant, Variant::Word);
    assert_eq!(word.cond(), Some(Condition::Equal));
    assert_eq!(word.branch_target(), Some(0x3F2));

    let long = decode(&[0x61FF, 0x0001, 0x0000], 0x400, CpuModel::M68020);
    assert_eq!(long.op, Op::Bsr);
    assert_eq!(long.variant, Variant::Long);
    assert_eq!(long.branch_target(), Some(0x1_0402));
    assert_eq!(long.length, 6);

    let dbra = decode(&[0x51C9, 0xFFFC], 0x400, CpuModel::M68000);
    assert_eq!(dbra.branch_target(), Some(0x3FE));
}

#[test]
fn quick_immediates_treat_zero_as_eight() {
    let inst = dec(&[0x5048]);
    assert_eq!(inst.src, Operand::Immediate(8));
    assert_eq!(inst.dst, Operand::AddrReg(0));
    assert_eq!(inst.variant, Variant::Quick);

    let inst = dec(&[0xE112]);
    assert_eq!(inst.src, Operand::Immediate(8));
    assert_eq!(inst.extra, Extra::Size(Size::Byte));
}

#[test]
fn illegal_combinations_decode_as_invalid() {
    // MOVE.B A0,D0
    assert_eq!(dec(&[0x1008]).op, Op::Invalid);
    // MOVEA.B is not a thing
    assert_eq!(dec(&[0x1048]).op, Op::Invalid);
    // LEA D0,A0
    assert_eq!(dec(&[0x41C0]).op, Op::Invalid);
    // MOVEQ with bit 8 set
    assert_eq!(dec(&[0x7100]).op, Op::Invalid);
    // mode 7, register 5
    assert_eq!(dec(&[0x303D]).op, Op::Invalid);
    // ADDI to an immediate destination
    let invalid = dec(&[0x067C, 0x0001]);
    assert_eq!((invalid.op, invalid.length), (Op::Invalid, 2));
    assert_eq!(invalid.src, Operand::Immediate(0x067C));
}

#[test]
fn later_models_unlock_their_encodings() {
    // RTD #4
    assert_eq!(dec(&[0x4E74, 0x0004]).op, Op::Invalid);
    let rtd = decode(&[0x4E74, 0x0004], 0, CpuModel::M68010);
    assert_eq!((rtd.op, rtd.src), (Op::Rtd, Operand::Immediate(4)));

    // EXTB.L D3
    assert_eq!(dec(&[0x49C3]).op, Op::Invalid);
    let extb = decode(&[0x49C3], 0, CpuModel::M68020);
    assert_eq!((extb.op, extb.dst), (Op::Extb, Operand::DataReg(3)));

    // MULU.L (A0),D1 is decoded structurally
    let mull = decode(&[0x4C10, 0x1000], 0, CpuModel::M68020);
    assert_eq!((mull.op, mull.length), (Op::MulL, 4));
}

#[test]
fn cas_size_comes_from_bits_ten_and_nine() {
    // CAS.B D0,D1,(A0) / CAS.W / CAS.L
    let cases = [
        (0x0AD0, Size::Byte),
        (0x0CD0, Size::Word),
        (0x0ED0, Size::Long),
    ];
    for (opcode, size) in cases {
        let inst = decode(&[opcode, 0x0040], 0, CpuModel::M68020);
        assert_eq!((inst.op, inst.size(), inst.length), (Op::Cas, Some(size), 4));
        assert_eq!(inst.src, Operand::RegPair { primary: 0, secondary: 1 });
        assert_eq!(inst.dst, Operand::AddrInd(0));
    }
    assert_eq!(dec(&[0x0AD0, 0x0040]).op, Op::Invalid);
}

#[test]
fn scaled_index_on_68020() {
    // MOVE.W 4(A0,D1.W*4),D0
    let inst = decode(&[0x3030, 0x1404], 0, CpuModel::M68020);
    assert_eq!(
        inst.src,
        Operand::AddrIndIndex {
            reg: 0,
            index: IndexReg {
                reg: 1,
                long: false,
                scale: 4,
            },
            disp: 4,
        }
    );
    // the 68000 ignores the scale bits
    let inst = dec(&[0x3030, 0x1404]);
    assert!(matches!(inst.src, Operand::AddrIndIndex { index: IndexReg { scale: 1, .. }, .. }));
}

#[test]
fn full_extension_memory_indirect() {
    // MOVE.L ([$10,A0],D1.L*2,$20),D0: post-indexed, word bd, word od
    let words = [0x2030, 0x1B26, 0x0010, 0x0020];
    let inst = decode(&words, 0, CpuModel::M68020);
    assert_eq!(inst.length, 8);
    assert_eq!(
        inst.src,
        Operand::AddrIndFull {
            reg: 0,
            full: FullIndex {
                base_suppressed: false,
                index: Some(IndexReg {
                    reg: 1,
                    long: true,
                    scale: 2,
                }),
                base_disp: 0x10,
                memory: MemoryIndirect::PostIndexed { outer: 0x20 },
            },
        }
    );

    // index suppressed with a post-indexed selector is reserved
    let reserved = [0x2030, 0x0166];
    assert_eq!(
        try_decode(&reserved, 0, CpuModel::M68020),
        Err(DecodeError::ReservedExtension { ext: 0x0166 })
    );
    assert_eq!(decode(&reserved, 0, CpuModel::M68020).length, 2);
}

#[test]
fn pc_relative_full_extension_is_normalized() {
    // JMP ($100,PC) through a full extension with a word base displacement
    let words = [0x4EFB, 0x0160, 0x0100];
    let inst = decode(&words, 0x2000, CpuModel::M68020);
    let Operand::PcIndFull(full) = inst.src else {
        panic!("pc full format expected, got {:?}", inst.src);
    };
    assert!(full.index.is_none());
    assert_eq!(full.base_disp, 0x100);
    assert_eq!(inst.length, 6);
}
