// SPDX-License-Identifier: GPL-3.0-or-later

use crate::bitboard::*;
use crate::nnue;
use crate::types::*;

use anyhow::{bail, Context, Result};
use std::fmt;

pub mod zobrist {
    use crate::bitboard::pseudo_attacks;
    use crate::misc::Prng;
    use crate::types::*;

    pub type Key = u64;

    static mut PIECES: [[Key; 64]; 16] = [[0; 64]; 16];
    static mut ENPASSANT: [Key; 8] = [0; 8];
    static mut CASTLING: [Key; 16] = [0; 16];
    static mut SIDE: Key = 0;

    // Cuckoo tables for upcoming-repetition detection. Every reversible
    // non-pawn move between two squares hashes to the XOR of its two
    // piece-square keys and the side key; has_game_cycled() can then ask in
    // O(1) whether some reversible move leads back to a previously seen key.
    const CUCKOO_SIZE: usize = 8192;
    static mut CUCKOO: [Key; CUCKOO_SIZE] = [0; CUCKOO_SIZE];
    static mut CUCKOO_MOVE: [Move; CUCKOO_SIZE] = [Move::NONE; CUCKOO_SIZE];

    pub fn psq(pc: Piece, s: Square) -> Key {
        unsafe { PIECES[pc.0 as usize][s.0 as usize] }
    }

    pub fn enpassant(f: File) -> Key {
        unsafe { ENPASSANT[f as usize] }
    }

    pub fn castling(cr: CastlingRights) -> Key {
        unsafe { CASTLING[cr.0 as usize] }
    }

    pub fn side() -> Key {
        unsafe { SIDE }
    }

    pub fn h1(key: Key) -> usize {
        (key & 0x1fff) as usize
    }

    pub fn h2(key: Key) -> usize {
        ((key >> 16) & 0x1fff) as usize
    }

    pub fn cuckoo(i: usize) -> Key {
        unsafe { CUCKOO[i] }
    }

    pub fn cuckoo_move(i: usize) -> Move {
        unsafe { CUCKOO_MOVE[i] }
    }

    // Called once at startup, after bitboard::init().
    pub fn init() {
        let mut rng = Prng::new(534895);

        unsafe {
            for pt in 1..=6 {
                for c in [WHITE, BLACK] {
                    let pc = Piece::make(c, PieceType(pt));
                    for s in 0..64 {
                        PIECES[pc.0 as usize][s] = rng.rand64();
                    }
                }
            }

            for f in 0..8 {
                ENPASSANT[f] = rng.rand64();
            }

            for cr in 0..16 {
                CASTLING[cr] = rng.rand64();
            }

            SIDE = rng.rand64();

            // Prepare the cuckoo tables.
            let mut count = 0;
            for pt in 2..=6 {
                for c in [WHITE, BLACK] {
                    let pc = Piece::make(c, PieceType(pt));
                    for s1 in 0..64u32 {
                        for s2 in s1 + 1..64 {
                            let (sq1, sq2) = (Square(s1), Square(s2));
                            if (pseudo_attacks(PieceType(pt), sq1) & sq2).none() {
                                continue;
                            }
                            let mut m = Move::make(sq1, sq2);
                            let mut key = psq(pc, sq1) ^ psq(pc, sq2) ^ SIDE;
                            let mut i = h1(key);
                            loop {
                                let (k, mv) = (CUCKOO[i], CUCKOO_MOVE[i]);
                                CUCKOO[i] = key;
                                CUCKOO_MOVE[i] = m;
                                key = k;
                                m = mv;
                                if m == Move::NONE {
                                    break;
                                }
                                i = if i == h1(key) { h2(key) } else { h1(key) };
                            }
                            count += 1;
                        }
                    }
                }
            }
            debug_assert!(count == 3668);
        }
    }
}

pub use zobrist::Key;

// Per-ply snapshot, pushed on every move. Restoring a previous position is
// popping one entry and undoing the board mutation.
#[derive(Clone)]
pub struct PositionInfo {
    pub key: Key,
    pub castling_rights: CastlingRights,
    pub fifty_rule: i32,
    pub plies_from_null: i32,
    pub repetition: bool,
    pub captured_piece: Piece,
    pub ep_square: Square,
    pub checkers: Bitboard,
    pub blockers: Bitboard,
    pub pinners: Bitboard,
    pub non_pawn_material: [Value; 2],
    pub check_squares: [Bitboard; 8],
    pub produced_by: Move,
}

impl PositionInfo {
    fn new() -> PositionInfo {
        PositionInfo {
            key: 0,
            castling_rights: NO_CASTLE,
            fifty_rule: 0,
            plies_from_null: 0,
            repetition: false,
            captured_piece: NO_PIECE,
            ep_square: Square::NONE,
            checkers: EMPTY_BB,
            blockers: EMPTY_BB,
            pinners: EMPTY_BB,
            non_pawn_material: [VALUE_ZERO; 2],
            check_squares: [EMPTY_BB; 8],
            produced_by: Move::NONE,
        }
    }
}

pub const PIECE_TO_CHAR: &str = ".PNBRQK  pnbrqk";

pub const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

#[derive(Clone)]
pub struct Position {
    by_type_bb: [Bitboard; 8],
    by_color_bb: [Bitboard; 2],
    occupied_bb: Bitboard,
    board: [Piece; 64],
    side_to_move: Color,
    game_ply: i32,
    chess960: bool,
    castle_path: [Bitboard; 16],
    castle_rook_square: [Square; 16],
    castle_mask: [u32; 64],
    states: Vec<PositionInfo>,
    eval: nnue::Evaluator,
}

impl Position {
    pub fn from_fen(fen: &str, chess960: bool) -> Result<Position> {
        let mut pos = Position {
            by_type_bb: [EMPTY_BB; 8],
            by_color_bb: [EMPTY_BB; 2],
            occupied_bb: EMPTY_BB,
            board: [NO_PIECE; 64],
            side_to_move: WHITE,
            game_ply: 0,
            chess960,
            castle_path: [EMPTY_BB; 16],
            castle_rook_square: [Square::NONE; 16],
            castle_mask: [0; 64],
            states: vec![PositionInfo::new()],
            eval: nnue::Evaluator::new(),
        };

        let mut parts = fen.split_whitespace();

        // 1. Piece placement, from a8.
        let placement = parts.next().context("empty FEN")?;
        let mut s = Square::A8;
        for c in placement.chars() {
            if let Some(d) = c.to_digit(10) {
                if d < 1 || d > 8 {
                    bail!("bad skip count '{}' in FEN", c);
                }
                s += (d as i32) * EAST;
            } else if c == '/' {
                s += 2 * SOUTH;
            } else if let Some(idx) = PIECE_TO_CHAR.find(c).filter(|_| c.is_ascii_alphabetic()) {
                if !s.is_ok() {
                    bail!("piece placement runs off the board");
                }
                pos.set_piece(Piece(idx as u32), s);
                s += EAST;
            } else {
                bail!("unknown piece character '{}'", c);
            }
        }
        if popcount(pos.pieces_cp(WHITE, KING)) != 1 || popcount(pos.pieces_cp(BLACK, KING)) != 1 {
            bail!("each side needs exactly one king");
        }

        // 2. Active color.
        let stm = parts.next().context("missing side to move")?;
        pos.side_to_move = match stm {
            "w" => WHITE,
            "b" => BLACK,
            _ => bail!("bad side to move '{}'", stm),
        };

        // 3. Castling availability. Standard FEN letters, Shredder-FEN rook
        // files, and X-FEN inner-rook letters are all accepted.
        let castling = parts.next().unwrap_or("-");
        if castling != "-" {
            for c in castling.chars() {
                let color = if c.is_lowercase() { BLACK } else { WHITE };
                let rook = Piece::make(color, ROOK);
                let upper = c.to_ascii_uppercase();
                let rsq = if upper == 'K' {
                    let mut r = Square::H1.relative(color);
                    while pos.piece_on(r) != rook {
                        if r.file() == FILE_A {
                            bail!("no rook for castling right '{}'", c);
                        }
                        r += WEST;
                    }
                    r
                } else if upper == 'Q' {
                    let mut r = Square::A1.relative(color);
                    while pos.piece_on(r) != rook {
                        if r.file() == FILE_H {
                            bail!("no rook for castling right '{}'", c);
                        }
                        r += EAST;
                    }
                    r
                } else if ('A'..='H').contains(&upper) {
                    Square::make(upper as u32 - 'A' as u32, relative_rank(color, RANK_1))
                } else {
                    bail!("bad castling token '{}'", c);
                };
                if pos.piece_on(rsq) != rook {
                    bail!("no rook on {} for castling right '{}'", rsq, c);
                }
                pos.set_castling_rights(color, rsq);
            }
        }

        // 4. En passant square, ignored unless a capture is actually
        // possible.
        let ep = parts.next().unwrap_or("-");
        pos.st_mut().ep_square = Square::NONE;
        if ep != "-" {
            let bytes = ep.as_bytes();
            if bytes.len() != 2 {
                bail!("bad en passant square '{}'", ep);
            }
            let f = (bytes[0] as i32 - 'a' as i32) as u32;
            let r = (bytes[1] as i32 - '1' as i32) as u32;
            let us = pos.side_to_move;
            if f <= FILE_H && r == relative_rank(us, RANK_6) {
                let ep_sq = Square::make(f, r);
                if (pawn_attacks(!us, ep_sq) & pos.pieces_cp(us, PAWN)).any()
                    && (pos.pieces_cp(!us, PAWN) & (ep_sq + pawn_push(!us))).any()
                    && pos.is_empty(ep_sq)
                {
                    pos.st_mut().ep_square = ep_sq;
                }
            }
        }

        // 5-6. Halfmove clock and fullmove number.
        pos.st_mut().fifty_rule = parts.next().and_then(|t| t.parse().ok()).unwrap_or(0);
        let fullmove: i32 = parts.next().and_then(|t| t.parse().ok()).unwrap_or(1);
        pos.game_ply = std::cmp::max(2 * (fullmove - 1), 0) + (pos.side_to_move == BLACK) as i32;

        pos.set_key();
        pos.update();
        pos.reset_eval();

        if (pos.attackers(pos.ksq(!pos.side_to_move), None) & pos.pieces_c(pos.side_to_move))
            .any()
        {
            bail!("side not to move is in check");
        }

        Ok(pos)
    }

    pub fn startpos() -> Position {
        Position::from_fen(START_FEN, false).unwrap()
    }

    fn st(&self) -> &PositionInfo {
        self.states.last().unwrap()
    }

    fn st_mut(&mut self) -> &mut PositionInfo {
        self.states.last_mut().unwrap()
    }

    pub fn side(&self) -> Color {
        self.side_to_move
    }

    pub fn key(&self) -> Key {
        self.st().key
    }

    pub fn previous_key(&self, count: usize) -> Key {
        self.states[self.states.len() - 1 - count].key
    }

    pub fn produced_by(&self) -> Move {
        self.st().produced_by
    }

    pub fn game_ply(&self) -> i32 {
        self.game_ply
    }

    pub fn fifty_rule(&self) -> i32 {
        self.st().fifty_rule
    }

    pub fn plies_from_null(&self) -> i32 {
        self.st().plies_from_null
    }

    pub fn captured(&self) -> Piece {
        self.st().captured_piece
    }

    pub fn ep_square(&self) -> Square {
        self.st().ep_square
    }

    pub fn checkers(&self) -> Bitboard {
        self.st().checkers
    }

    pub fn blockers(&self) -> Bitboard {
        self.st().blockers
    }

    pub fn pinners(&self) -> Bitboard {
        self.st().pinners
    }

    pub fn check_squares(&self, pt: PieceType) -> Bitboard {
        self.st().check_squares[pt.0 as usize]
    }

    pub fn non_pawn_material(&self, c: Color) -> Value {
        self.st().non_pawn_material[c.0 as usize]
    }

    pub fn is_chess960(&self) -> bool {
        self.chess960
    }

    pub fn pieces(&self) -> Bitboard {
        self.occupied_bb
    }

    pub fn pieces_c(&self, c: Color) -> Bitboard {
        self.by_color_bb[c.0 as usize]
    }

    pub fn pieces_p(&self, pt: PieceType) -> Bitboard {
        self.by_type_bb[pt.0 as usize]
    }

    pub fn pieces_pp(&self, pt1: PieceType, pt2: PieceType) -> Bitboard {
        self.pieces_p(pt1) | self.pieces_p(pt2)
    }

    pub fn pieces_cp(&self, c: Color, pt: PieceType) -> Bitboard {
        self.pieces_c(c) & self.pieces_p(pt)
    }

    pub fn pieces_cpp(&self, c: Color, pt1: PieceType, pt2: PieceType) -> Bitboard {
        self.pieces_c(c) & self.pieces_pp(pt1, pt2)
    }

    pub fn piece_on(&self, s: Square) -> Piece {
        debug_assert!(s.is_ok());
        self.board[s.0 as usize]
    }

    pub fn is_empty(&self, s: Square) -> bool {
        self.piece_on(s) == NO_PIECE
    }

    pub fn piece_moved(&self, m: Move) -> Piece {
        self.piece_on(m.from())
    }

    pub fn ksq(&self, c: Color) -> Square {
        lsb(self.pieces_cp(c, KING))
    }

    pub fn is_capture(&self, m: Move) -> bool {
        debug_assert!(m.is_ok());
        (!self.is_empty(m.to()) && m.move_type() != CASTLING) || m.move_type() == EN_PASSANT
    }

    pub fn is_promotion(&self, m: Move) -> bool {
        m.move_type() == PROMOTION
    }

    pub fn is_noisy(&self, m: Move) -> bool {
        self.is_capture(m) || self.is_promotion(m)
    }

    pub fn is_quiet(&self, m: Move) -> bool {
        !self.is_noisy(m)
    }

    pub fn can_castle(&self, rights: CastlingRights) -> bool {
        !(rights & self.st().castling_rights).is_empty()
    }

    pub fn castling_rights(&self, c: Color) -> CastlingRights {
        CastlingRights::for_side(c) & self.st().castling_rights
    }

    pub fn castling_blocked(&self, rights: CastlingRights) -> bool {
        (self.pieces() & self.castle_path[rights.0 as usize]).any()
    }

    pub fn castle_rook_square(&self, rights: CastlingRights) -> Square {
        self.castle_rook_square[rights.0 as usize]
    }

    fn set_piece(&mut self, pc: Piece, s: Square) {
        debug_assert!(pc != NO_PIECE && s.is_ok());
        self.board[s.0 as usize] = pc;
        self.by_type_bb[pc.piece_type().0 as usize] |= s;
        self.by_color_bb[pc.color().0 as usize] |= s;
        self.occupied_bb |= s;
    }

    fn pop_piece(&mut self, s: Square) {
        let pc = self.board[s.0 as usize];
        debug_assert!(pc != NO_PIECE);
        self.by_type_bb[pc.piece_type().0 as usize] ^= s;
        self.by_color_bb[pc.color().0 as usize] ^= s;
        self.occupied_bb ^= s;
        self.board[s.0 as usize] = NO_PIECE;
    }

    fn move_piece(&mut self, from: Square, to: Square) {
        let pc = self.board[from.0 as usize];
        let b = from.bb() ^ to.bb();
        self.by_type_bb[pc.piece_type().0 as usize] ^= b;
        self.by_color_bb[pc.color().0 as usize] ^= b;
        self.occupied_bb ^= b;
        self.board[from.0 as usize] = NO_PIECE;
        self.board[to.0 as usize] = pc;
    }

    fn set_castling_rights(&mut self, c: Color, rook_square: Square) {
        let king_from = self.ksq(c);
        let rights = CastlingRights::for_side(c)
            & if king_from < rook_square { KING_SIDE } else { QUEEN_SIDE };

        self.st_mut().castling_rights |= rights;
        self.castle_mask[king_from.0 as usize] |= rights.0;
        self.castle_mask[rook_square.0 as usize] |= rights.0;
        self.castle_rook_square[rights.0 as usize] = rook_square;

        let king_side = !(rights & KING_SIDE).is_empty();
        let king_to = Square::make(if king_side { FILE_G } else { FILE_C }, king_from.rank());
        let rook_to = Square::make(if king_side { FILE_F } else { FILE_D }, king_from.rank());

        self.castle_path[rights.0 as usize] = (between_bb(rook_square, rook_to)
            | between_bb(king_from, king_to))
            & !(king_from.bb() | rook_square.bb());
    }

    // Rebuild the hash key from scratch. Used at setup; the incremental key
    // maintained by do_move() must always agree with this.
    fn set_key(&mut self) {
        let mut key = 0;
        for s in self.pieces() {
            key ^= zobrist::psq(self.piece_on(s), s);
        }
        if self.st().ep_square != Square::NONE {
            key ^= zobrist::enpassant(self.st().ep_square.file());
        }
        key ^= zobrist::castling(self.st().castling_rights);
        if self.side_to_move == BLACK {
            key ^= zobrist::side();
        }

        let mut npm = [VALUE_ZERO; 2];
        for s in self.pieces() & !self.pieces_p(PAWN) & !self.pieces_p(KING) {
            let pc = self.piece_on(s);
            npm[pc.color().0 as usize] += piece_value(pc.piece_type());
        }

        self.st_mut().key = key;
        self.st_mut().non_pawn_material = npm;
    }

    // The same key computed from scratch, for consistency checks.
    pub fn computed_key(&self) -> Key {
        let mut key = 0;
        for s in self.pieces() {
            key ^= zobrist::psq(self.piece_on(s), s);
        }
        if self.st().ep_square != Square::NONE {
            key ^= zobrist::enpassant(self.st().ep_square.file());
        }
        key ^= zobrist::castling(self.st().castling_rights);
        if self.side_to_move == BLACK {
            key ^= zobrist::side();
        }
        key
    }

    // Recompute checkers, pins, blockers and per-piece check squares. These
    // are functions of the rest of the board state and go stale on every
    // mutation.
    fn update(&mut self) {
        let us = self.side_to_move;
        let them = !us;
        let ks = self.ksq(us);
        let eks = self.ksq(them);

        let lateral = self.pieces_cpp(them, ROOK, QUEEN);
        let diagonal = self.pieces_cpp(them, BISHOP, QUEEN);

        let slider_attacks = (attacks_bb(ROOK, ks, self.pieces_c(them)) & lateral)
            | (attacks_bb(BISHOP, ks, self.pieces_c(them)) & diagonal);

        let mut checkers = (pawn_attacks(us, ks) & self.pieces_cp(them, PAWN))
            | (pseudo_attacks(KNIGHT, ks) & self.pieces_cp(them, KNIGHT));
        let mut pinners = EMPTY_BB;
        let mut blockers = EMPTY_BB;

        for s in slider_attacks {
            let between = (between_bb(ks, s) ^ s) & self.pieces_c(us);
            if between.none() {
                checkers |= s;
            } else if !more_than_one(between) {
                pinners |= s;
                blockers |= between;
            }
        }

        let st = self.states.last_mut().unwrap();
        st.checkers = checkers;
        st.pinners = pinners;
        st.blockers = blockers;
        st.check_squares[PAWN.0 as usize] = pawn_attacks(them, eks);
        st.check_squares[KNIGHT.0 as usize] = pseudo_attacks(KNIGHT, eks);
        st.check_squares[BISHOP.0 as usize] = attacks_bb(BISHOP, eks, self.occupied_bb);
        st.check_squares[ROOK.0 as usize] = attacks_bb(ROOK, eks, self.occupied_bb);
        st.check_squares[QUEEN.0 as usize] =
            st.check_squares[BISHOP.0 as usize] | st.check_squares[ROOK.0 as usize];
        st.check_squares[KING.0 as usize] = EMPTY_BB;
    }

    // All pieces of both colors attacking square s under the given occupancy.
    pub fn attackers(&self, s: Square, occupied: Option<Bitboard>) -> Bitboard {
        let o = occupied.unwrap_or(self.occupied_bb);

        (pawn_attacks(WHITE, s) & self.pieces_cp(BLACK, PAWN))
            | (pawn_attacks(BLACK, s) & self.pieces_cp(WHITE, PAWN))
            | (pseudo_attacks(KNIGHT, s) & self.pieces_p(KNIGHT))
            | (attacks_bb(BISHOP, s, o) & self.pieces_pp(BISHOP, QUEEN))
            | (attacks_bb(ROOK, s, o) & self.pieces_pp(ROOK, QUEEN))
            | (pseudo_attacks(KING, s) & self.pieces_p(KING))
    }

    // Union of the squares attacked by all pieces of the given type and side.
    pub fn attacks_by(&self, pt: PieceType, c: Color) -> Bitboard {
        if pt == PAWN {
            return pawn_attacks_bb(c, self.pieces_cp(c, PAWN));
        }
        let mut threat = EMPTY_BB;
        for s in self.pieces_cp(c, pt) {
            threat |= attacks_bb(pt, s, self.occupied_bb);
        }
        threat
    }

    // Our pieces whose removal would reveal an attack by one of our sliders
    // on the enemy king, i.e. discovered check candidates.
    fn discovered_candidates(&self) -> Bitboard {
        let us = self.side_to_move;
        let eks = self.ksq(!us);

        let snipers = (pseudo_attacks(ROOK, eks) & self.pieces_cpp(us, ROOK, QUEEN))
            | (pseudo_attacks(BISHOP, eks) & self.pieces_cpp(us, BISHOP, QUEEN));

        let mut candidates = EMPTY_BB;
        for sniper in snipers {
            let between = (between_bb(eks, sniper) ^ sniper) & self.pieces();
            if between.any() && !more_than_one(between) {
                candidates |= between & self.pieces_c(us);
            }
        }
        candidates
    }

    // gives_check() answers whether a pseudo-legal move checks the enemy
    // king, using the precomputed check squares plus discovered-check
    // geometry. The special move types get their own case analysis.
    pub fn gives_check(&self, m: Move) -> bool {
        debug_assert!(m.is_ok());

        let us = self.side_to_move;
        let from = m.from();
        let to = m.to();
        let eks = self.ksq(!us);

        if (self.check_squares(self.piece_on(from).piece_type()) & to).any() {
            return true;
        }

        if (self.discovered_candidates() & from).any() && !lies_along(from, to, eks) {
            return true;
        }

        match m.move_type() {
            NORMAL => false,

            PROMOTION => {
                (attacks_bb(m.promotion_type(), to, self.pieces() ^ from) & eks).any()
            }

            // The one case left for en passant is a discovered check through
            // the captured pawn.
            EN_PASSANT => {
                let capsq = Square::make(to.file(), from.rank());
                let b = (self.pieces() ^ from ^ capsq) | to;
                ((attacks_bb(ROOK, eks, b) & self.pieces_cpp(us, ROOK, QUEEN))
                    | (attacks_bb(BISHOP, eks, b) & self.pieces_cpp(us, BISHOP, QUEEN)))
                .any()
            }

            CASTLING => {
                let king_side = to > from;
                let rto = Square::make(if king_side { FILE_F } else { FILE_D }, from.rank());
                let kto = Square::make(if king_side { FILE_G } else { FILE_C }, from.rank());
                (pseudo_attacks(ROOK, rto) & eks).any()
                    && (attacks_bb(ROOK, rto, (self.pieces() ^ from ^ to) | rto | kto) & eks).any()
            }

            _ => unreachable!(),
        }
    }

    // is_pseudolegal() filters moves that survive shape, geometry and
    // occupancy constraints. It does not check that the own king stays safe;
    // that is is_legal()'s job. Used to validate moves coming from the
    // transposition table or killer slots, which can be corrupted.
    pub fn is_pseudolegal(&self, m: Move) -> bool {
        if !m.is_ok() {
            return false;
        }

        let us = self.side_to_move;
        let them = !us;
        let from = m.from();
        let to = m.to();
        let pc = self.piece_moved(m);
        let mt = m.move_type();

        if pc == NO_PIECE || pc.color() != us {
            return false;
        }

        // Promotion bits may only be set on promotion moves.
        if mt != PROMOTION && (m.0 >> 12) & 3 != 0 {
            return false;
        }

        let captured = if mt == EN_PASSANT {
            Piece::make(them, PAWN)
        } else {
            self.piece_on(to)
        };

        if mt != CASTLING && captured != NO_PIECE && captured.color() != them {
            return false;
        }
        if captured.piece_type() == KING {
            return false;
        }

        if (mt == PROMOTION || mt == EN_PASSANT) && pc.piece_type() != PAWN {
            return false;
        }
        if mt == CASTLING && pc.piece_type() != KING {
            return false;
        }

        if mt == CASTLING {
            let rights = CastlingRights::for_side(us)
                & if from < to { KING_SIDE } else { QUEEN_SIDE };
            return self.can_castle(rights)
                && !self.castling_blocked(rights)
                && self.castle_rook_square(rights) == to
                && self.piece_on(to) == Piece::make(us, ROOK);
        }

        if pc.piece_type() == PAWN {
            if mt == EN_PASSANT {
                return to == self.ep_square()
                    && (pawn_attacks(us, from) & to).any()
                    && self.piece_on(to - pawn_push(us)) == Piece::make(them, PAWN)
                    && to.relative_rank(us) == RANK_6;
            }

            // Explicit membership of the target in the push, double-push and
            // capture candidate sets.
            let single = to == from + pawn_push(us);
            let double = to == from + 2 * pawn_push(us) && from.relative_rank(us) == RANK_2;
            let diagonal = (pawn_attacks(us, from) & to).any();

            if single {
                if !self.is_empty(to) {
                    return false;
                }
            } else if double {
                if !self.is_empty(from + pawn_push(us)) || !self.is_empty(to) {
                    return false;
                }
            } else if diagonal {
                if captured == NO_PIECE {
                    return false;
                }
            } else {
                return false;
            }

            if mt == PROMOTION {
                if to.relative_rank(us) != RANK_8 || from.relative_rank(us) != RANK_7 {
                    return false;
                }
            } else if to.relative_rank(us) == RANK_8 {
                return false;
            }
        } else if (attacks_bb(pc.piece_type(), from, self.occupied_bb) & to).none() {
            return false;
        }

        true
    }

    // is_legal() adds the own-king-safety check on top of pseudolegality,
    // including the en-passant discovered check along the vacated rank and
    // the attacked squares on a castling king's path.
    pub fn is_legal(&self, m: Move) -> bool {
        debug_assert!(m.is_ok());

        let us = self.side_to_move;
        let them = !us;
        let ks = self.ksq(us);
        let from = m.from();
        let to = m.to();
        let pc = self.piece_moved(m);

        if m.move_type() == EN_PASSANT {
            let capsq = to - pawn_push(us);
            let occupied = (self.pieces() ^ from ^ capsq) | to;

            debug_assert!(to == self.ep_square());
            debug_assert!(pc == Piece::make(us, PAWN));
            debug_assert!(self.piece_on(capsq) == Piece::make(them, PAWN));

            return (attacks_bb(ROOK, ks, occupied) & self.pieces_cpp(them, ROOK, QUEEN)).none()
                && (attacks_bb(BISHOP, ks, occupied) & self.pieces_cpp(them, BISHOP, QUEEN))
                    .none();
        }

        if m.move_type() == CASTLING {
            if self.checkers().any() {
                return false;
            }
            let king_side = to > from;
            let kto = Square::make(if king_side { FILE_G } else { FILE_C }, from.rank());
            let d = if kto > from { EAST } else { WEST };
            let mut s = from;
            while s != kto {
                s += d;
                if (self.attackers(s, None) & self.pieces_c(them)).any() {
                    return false;
                }
            }
            // The moving rook may have been shielding the king's destination
            // along the back rank.
            return !self.chess960
                || (attacks_bb(ROOK, kto, self.pieces() ^ to) & self.pieces_cpp(them, ROOK, QUEEN))
                    .none();
        }

        if pc.piece_type() == KING {
            return (self.attackers(to, Some(self.pieces() ^ from)) & self.pieces_c(them)).none();
        }

        // A pinned piece may only move along the pin ray, and not at all
        // while in check.
        if (self.blockers() & from).any() {
            return lies_along(from, to, ks) && self.checkers().none();
        }

        if more_than_one(self.checkers()) {
            return false;
        }
        if self.checkers().any() {
            // Block the check or capture the checker.
            return (between_bb(ks, lsb(self.checkers())) & to).any();
        }

        true
    }

    // do_move() applies a legal move: push a PositionInfo, mutate the board,
    // update the key incrementally and recompute the derived bitboards.
    pub fn do_move(&mut self, m: Move) {
        debug_assert!(m.is_ok());

        let prev = self.st().clone();
        self.states.push(PositionInfo::new());
        {
            let st = self.states.last_mut().unwrap();
            st.key = prev.key;
            st.castling_rights = prev.castling_rights;
            st.fifty_rule = prev.fifty_rule + 1;
            st.plies_from_null = prev.plies_from_null + 1;
            st.non_pawn_material = prev.non_pawn_material;
            st.produced_by = m;
        }
        self.game_ply += 1;

        let from = m.from();
        let to = m.to();
        let pc = self.piece_on(from);
        let us = self.side_to_move;
        let them = !us;
        let mt = m.move_type();

        debug_assert!(pc != NO_PIECE && pc.color() == us);

        let mut captured = if mt == EN_PASSANT {
            Piece::make(them, PAWN)
        } else {
            self.piece_on(to)
        };

        // Piece recorded for the evaluator delta; for castling this is the
        // rook taking part in the move.
        let eval_captured = if mt == CASTLING { Piece::make(us, ROOK) } else { captured };

        if mt == CASTLING {
            debug_assert!(pc.piece_type() == KING);
            debug_assert!(self.piece_on(to) == Piece::make(us, ROOK));

            let king_side = to > from;
            let king_to = Square::make(if king_side { FILE_G } else { FILE_C }, from.rank());
            let rook_from = to;
            let rook_to = Square::make(if king_side { FILE_F } else { FILE_D }, from.rank());

            // Remove both pieces before placing either: the squares can
            // overlap in Chess960.
            self.pop_piece(from);
            self.pop_piece(rook_from);
            self.set_piece(Piece::make(us, KING), king_to);
            self.set_piece(Piece::make(us, ROOK), rook_to);

            let rook = Piece::make(us, ROOK);
            let st = self.states.last_mut().unwrap();
            st.key ^= zobrist::psq(pc, from)
                ^ zobrist::psq(pc, king_to)
                ^ zobrist::psq(rook, rook_from)
                ^ zobrist::psq(rook, rook_to);

            captured = NO_PIECE;
        }

        if captured != NO_PIECE {
            let mut capsq = to;
            if mt == EN_PASSANT {
                capsq -= pawn_push(us);
                debug_assert!(pc == Piece::make(us, PAWN));
                debug_assert!(self.piece_on(to) == NO_PIECE);
                debug_assert!(to.relative_rank(us) == RANK_6);
            }

            self.pop_piece(capsq);
            let st = self.states.last_mut().unwrap();
            st.fifty_rule = 0;
            st.key ^= zobrist::psq(captured, capsq);
            if captured.piece_type() != PAWN {
                st.non_pawn_material[them.0 as usize] -= piece_value(captured.piece_type());
            }
        }

        if prev.ep_square != Square::NONE {
            self.st_mut().key ^= zobrist::enpassant(prev.ep_square.file());
        }

        // Castling rights can only disappear. For castling the king square's
        // mask already carries both of our rights.
        let mask = self.castle_mask[from.0 as usize] | self.castle_mask[to.0 as usize];
        if !self.st().castling_rights.is_empty() && mask != 0 {
            let st = self.states.last_mut().unwrap();
            st.key ^= zobrist::castling(st.castling_rights);
            st.castling_rights &= CastlingRights(!mask & ANY_CASTLE.0);
            st.key ^= zobrist::castling(st.castling_rights);
        }

        if mt != CASTLING {
            self.move_piece(from, to);
            self.st_mut().key ^= zobrist::psq(pc, from) ^ zobrist::psq(pc, to);
        }

        if pc.piece_type() == PAWN {
            if to.0 ^ from.0 == 16 {
                // Set the en passant square only if the pushed pawn can
                // actually be captured.
                let ep_sq = to - pawn_push(us);
                if (pawn_attacks(us, ep_sq) & self.pieces_cp(them, PAWN)).any() {
                    let st = self.states.last_mut().unwrap();
                    st.ep_square = ep_sq;
                    st.key ^= zobrist::enpassant(ep_sq.file());
                }
            } else if mt == PROMOTION {
                let promotion = Piece::make(us, m.promotion_type());
                debug_assert!(to.relative_rank(us) == RANK_8);
                debug_assert!(promotion.piece_type() >= KNIGHT && promotion.piece_type() <= QUEEN);

                self.pop_piece(to);
                self.set_piece(promotion, to);

                let st = self.states.last_mut().unwrap();
                st.key ^= zobrist::psq(pc, to) ^ zobrist::psq(promotion, to);
                st.non_pawn_material[us.0 as usize] += piece_value(promotion.piece_type());
            }

            self.st_mut().fifty_rule = 0;
        }

        self.st_mut().captured_piece = captured;
        self.st_mut().key ^= zobrist::side();
        self.side_to_move = them;

        self.update();

        // Repetition scan over the window the fifty-move and null counters
        // leave reachable, in strides of two plies.
        let st_len = self.states.len() - 1;
        let window = std::cmp::min(self.st().fifty_rule, self.st().plies_from_null) as usize;
        if window >= 4 {
            let key = self.st().key;
            let mut i = 4;
            while i <= window && i <= st_len {
                if self.states[st_len - i].key == key {
                    self.st_mut().repetition = true;
                    break;
                }
                i += 2;
            }
        }

        self.eval.push(m, pc, eval_captured);

        debug_assert_eq!(self.st().key, self.computed_key());
    }

    // undo_move() restores the exact prior state, including the key.
    pub fn undo_move(&mut self, m: Move) {
        debug_assert!(m.is_ok());
        debug_assert!(self.states.len() > 1);

        self.side_to_move = !self.side_to_move;
        self.game_ply -= 1;

        let us = self.side_to_move;
        let from = m.from();
        let to = m.to();
        let mt = m.move_type();

        debug_assert!(self.is_empty(from) || mt == CASTLING);
        debug_assert!(self.st().captured_piece.piece_type() != KING);

        if mt == PROMOTION {
            debug_assert!(to.relative_rank(us) == RANK_8);
            debug_assert!(self.piece_on(to).piece_type() == m.promotion_type());

            self.pop_piece(to);
            self.set_piece(Piece::make(us, PAWN), to);
        }

        if mt == CASTLING {
            let king_side = to > from;
            let king_from = Square::make(if king_side { FILE_G } else { FILE_C }, from.rank());
            let rook_from = Square::make(if king_side { FILE_F } else { FILE_D }, from.rank());

            self.pop_piece(king_from);
            self.pop_piece(rook_from);
            self.set_piece(Piece::make(us, KING), from);
            self.set_piece(Piece::make(us, ROOK), to);
        } else {
            self.move_piece(to, from);

            let captured = self.st().captured_piece;
            if captured != NO_PIECE {
                let mut capsq = to;
                if mt == EN_PASSANT {
                    capsq -= pawn_push(us);
                    debug_assert!(self.piece_on(capsq) == NO_PIECE);
                    debug_assert!(captured == Piece::make(!us, PAWN));
                }
                self.set_piece(captured, capsq);
            }
        }

        self.states.pop();
        self.eval.pop();
    }

    // Null moves flip the side to move and clear the en passant square, and
    // never touch material. The plies-from-null counter restarts so the
    // repetition window cannot cross a null move.
    pub fn do_null(&mut self) {
        debug_assert!(self.checkers().none());

        let mut st = self.st().clone();
        st.fifty_rule += 1;
        st.plies_from_null = 0;
        st.repetition = false;
        st.captured_piece = NO_PIECE;
        st.produced_by = Move::NULL;
        if st.ep_square != Square::NONE {
            st.key ^= zobrist::enpassant(st.ep_square.file());
            st.ep_square = Square::NONE;
        }
        st.key ^= zobrist::side();
        self.states.push(st);
        self.game_ply += 1;

        self.side_to_move = !self.side_to_move;
        self.update();
    }

    pub fn undo_null(&mut self) {
        debug_assert!(self.checkers().none());
        self.states.pop();
        self.game_ply -= 1;
        self.side_to_move = !self.side_to_move;
    }

    // is_draw() covers the fifty-move rule and the repetition flag set by
    // do_move(). Stalemate is the searcher's business.
    pub fn is_draw(&self) -> bool {
        if self.st().fifty_rule > 99 && self.checkers().none() {
            return true;
        }
        self.st().repetition
    }

    // has_game_cycled() reports that some reversible move from this position
    // reaches a position already seen in the game or search history, via the
    // cuckoo tables prepared at startup.
    pub fn has_game_cycled(&self, ply: i32) -> bool {
        let end = std::cmp::min(self.fifty_rule(), self.plies_from_null());
        if end < 3 {
            return false;
        }

        let original_key = self.key();
        let cur = self.states.len() - 1;

        let mut i = 3;
        while i <= end && i as usize <= cur {
            let move_key = original_key ^ self.states[cur - i as usize].key;

            let mut j = zobrist::h1(move_key);
            if zobrist::cuckoo(j) != move_key {
                j = zobrist::h2(move_key);
            }
            if zobrist::cuckoo(j) == move_key {
                let m = zobrist::cuckoo_move(j);
                let (s1, s2) = (m.from(), m.to());
                if ((between_bb(s1, s2) ^ s2) & self.pieces()).none() {
                    if ply > i {
                        return true;
                    }
                    // At or before the root the move must belong to the side
                    // to move and the earlier position must itself repeat.
                    let sq = if self.is_empty(s1) { s2 } else { s1 };
                    if !self.is_empty(sq)
                        && self.piece_on(sq).color() == self.side_to_move
                        && self.states[cur - i as usize].repetition
                    {
                        return true;
                    }
                }
            }
            i += 2;
        }
        false
    }

    // Static exchange evaluation with the standard swap algorithm: resolve
    // the capture sequence on the target square, always recapturing with the
    // least valuable attacker and re-introducing X-ray attackers as pieces
    // vacate the lines.
    pub fn see(&self, m: Move) -> Value {
        debug_assert!(m.is_ok());
        if m.move_type() != NORMAL {
            return VALUE_ZERO;
        }

        let from = m.from();
        let to = m.to();
        let victim = self.piece_on(to).piece_type();
        if victim == NO_PIECE_TYPE {
            return VALUE_ZERO;
        }

        let mut gain = [VALUE_ZERO; 32];
        let mut depth = 0usize;
        gain[0] = piece_value(victim);

        let mut occupied = self.pieces() ^ from;
        let mut attacker_pt = self.piece_on(from).piece_type();
        let mut attackers = self.attackers(to, Some(occupied)) & occupied;
        let mut stm = !self.side_to_move;

        let diagonal = self.pieces_pp(BISHOP, QUEEN);
        let lateral = self.pieces_pp(ROOK, QUEEN);

        loop {
            let active = attackers & self.pieces_c(stm);
            if active.none() {
                break;
            }

            // Least valuable attacker first.
            let mut pt = PAWN;
            while pt < KING && (self.pieces_cp(stm, pt) & active).none() {
                pt = PieceType(pt.0 + 1);
            }

            // The king may only recapture if it would not be recaptured.
            if pt == KING && (attackers & self.pieces_c(!stm)).any() {
                break;
            }

            depth += 1;
            gain[depth] = piece_value(attacker_pt) - gain[depth - 1];

            if std::cmp::max(-gain[depth - 1], gain[depth]) < 0 {
                break;
            }

            let s = lsb(self.pieces_cp(stm, pt) & active);
            occupied ^= s;

            if pt == PAWN || pt == BISHOP || pt == QUEEN {
                attackers |= attacks_bb(BISHOP, to, occupied) & diagonal;
            }
            if pt == ROOK || pt == QUEEN {
                attackers |= attacks_bb(ROOK, to, occupied) & lateral;
            }
            attackers &= occupied;

            attacker_pt = pt;
            stm = !stm;
        }

        while depth > 0 {
            gain[depth - 1] = -std::cmp::max(-gain[depth - 1], gain[depth]);
            depth -= 1;
        }
        gain[0]
    }

    pub fn evaluate(&mut self) -> Value {
        let mut ev = std::mem::take(&mut self.eval);
        let v = ev.evaluate(self);
        self.eval = ev;
        clamp_score(v)
    }

    // Full accumulator rebuild followed by a forward pass. Must agree with
    // the incrementally maintained evaluate() for every reachable position.
    pub fn predict(&mut self) -> Value {
        let mut ev = std::mem::take(&mut self.eval);
        let v = ev.predict(self);
        self.eval = ev;
        clamp_score(v)
    }

    pub fn reset_eval(&mut self) {
        let mut ev = std::mem::take(&mut self.eval);
        ev.reset(self);
        self.eval = ev;
    }

    pub fn fen(&self) -> String {
        let mut out = String::new();

        for r in (0..8).rev() {
            let mut empty = 0;
            for f in 0..8 {
                let pc = self.piece_on(Square::make(f, r));
                if pc == NO_PIECE {
                    empty += 1;
                } else {
                    if empty > 0 {
                        out.push((b'0' + empty) as char);
                        empty = 0;
                    }
                    out.push(PIECE_TO_CHAR.as_bytes()[pc.0 as usize] as char);
                }
            }
            if empty > 0 {
                out.push((b'0' + empty) as char);
            }
            if r > 0 {
                out.push('/');
            }
        }

        out.push_str(if self.side_to_move == WHITE { " w " } else { " b " });

        let mut any = false;
        for (rights, ch) in [
            (WHITE_KING_SIDE, 'K'),
            (WHITE_QUEEN_SIDE, 'Q'),
            (BLACK_KING_SIDE, 'k'),
            (BLACK_QUEEN_SIDE, 'q'),
        ] {
            if self.can_castle(rights) {
                any = true;
                if self.chess960 {
                    let f = self.castle_rook_square(rights).file();
                    let base = if ch.is_uppercase() { b'A' } else { b'a' };
                    out.push((base + f as u8) as char);
                } else {
                    out.push(ch);
                }
            }
        }
        if !any {
            out.push('-');
        }

        if self.ep_square() == Square::NONE {
            out.push_str(" - ");
        } else {
            out.push(' ');
            out.push_str(&self.ep_square().to_string());
            out.push(' ');
        }

        out.push_str(&format!(
            "{} {}",
            self.fifty_rule(),
            1 + (self.game_ply - (self.side_to_move == BLACK) as i32) / 2
        ));

        out
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "+-----------------+")?;
        for r in (0..8).rev() {
            write!(f, "|")?;
            for file in 0..8 {
                let pc = self.piece_on(Square::make(file, r));
                write!(f, " {}", PIECE_TO_CHAR.as_bytes()[pc.0 as usize] as char)?;
            }
            writeln!(f, " | {}", 1 + r)?;
        }
        writeln!(f, "+-----------------+")?;
        writeln!(f, "  a b c d e f g h")?;
        writeln!(f)?;
        writeln!(f, "Fen: {}", self.fen())?;
        write!(f, "Key: {:016X}\nCheckers:", self.key())?;
        for s in self.checkers() {
            write!(f, " {}", s)?;
        }
        Ok(())
    }
}
