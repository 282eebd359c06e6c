//! The textual IL parser (§4.3). Accepts the grammar described there:
//! version header, externs, globals, and functions made of labeled basic
//! blocks, each holding a sequence of instructions and one terminator.
//!
//! Label references are accepted with or without a leading `^` sigil — the
//! source contract's literal examples use both spellings interchangeably
//! (compare E1–E3's bare `T`, `F`, `Join` targets against E4/E6's `^h`,
//! `^one`, `^two`), so the parser treats `^name` and `name` as the same
//! token when a label reference is expected. This is recorded as a
//! resolved ambiguity in `DESIGN.md`.

use crate::builder::ModuleBuilder;
use crate::error::ParseError;
use crate::ids::{BlockId, FuncId, TempId};
use crate::lexer::{Lexer, Pos, Tok};
use crate::module::{GlobalInit, Module, SourceLoc, Target};
use crate::opcode::Opcode;
use crate::ty::Ty;
use crate::value::Value;
use rustc_hash::FxHashMap;

pub fn parse(src: &str) -> Result<Module, ParseError> {
    let (header_line, rest, header_line_no) = split_header(src)?;
    let version = parse_version(header_line)?;

    let toks = Lexer::new(rest)
        .tokenize()
        .map_err(|e| ParseError::Syntax { line: header_line_no, message: e })?;
    let toks: Vec<(Tok, Pos)> = toks
        .into_iter()
        .filter(|(t, _)| !matches!(t, Tok::Newline))
        .map(|(t, p)| (t, Pos { line: p.line + header_line_no, col: p.col }))
        .collect();

    let mut p = Parser { toks, pos: 0, b: ModuleBuilder::new(version), ret_types: FxHashMap::default() };
    p.ret_types = p.prescan_signatures();
    p.parse_module()?;
    let mut m = p.b.finish();
    m.reindex();
    Ok(m)
}

fn split_header(src: &str) -> Result<(&str, &str, u32), ParseError> {
    for (i, line) in src.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with("//") {
            continue;
        }
        let rest_offset = src
            .match_indices(line)
            .next()
            .map(|(off, _)| off + line.len())
            .unwrap_or(src.len());
        return Ok((trimmed, &src[rest_offset..], i as u32 + 1));
    }
    Err(ParseError::BadVersion("empty module".into()))
}

fn parse_version(header: &str) -> Result<(u16, u16, u16), ParseError> {
    let mut it = header.split_whitespace();
    let kw = it.next().ok_or_else(|| ParseError::BadVersion(header.to_string()))?;
    if kw != "il" {
        return Err(ParseError::BadVersion(header.to_string()));
    }
    let ver = it.next().ok_or_else(|| ParseError::BadVersion(header.to_string()))?;
    let parts: Vec<&str> = ver.split('.').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return Err(ParseError::BadVersion(ver.to_string()));
    }
    let major: u16 = parts[0].parse().map_err(|_| ParseError::BadVersion(ver.to_string()))?;
    let minor: u16 = parts[1].parse().map_err(|_| ParseError::BadVersion(ver.to_string()))?;
    let patch: u16 = if parts.len() == 3 {
        parts[2].parse().map_err(|_| ParseError::BadVersion(ver.to_string()))?
    } else {
        0
    };
    Ok((major, minor, patch))
}

struct Parser {
    toks: Vec<(Tok, Pos)>,
    pos: usize,
    b: ModuleBuilder,
    /// Return types of every extern/function header in the source,
    /// collected before the main pass so a `call` to a function declared
    /// later in the file still resolves its result type.
    ret_types: FxHashMap<String, Ty>,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos).map(|(t, _)| t)
    }

    fn peek_at(&self, off: usize) -> Option<&Tok> {
        self.toks.get(self.pos + off).map(|(t, _)| t)
    }

    fn line(&self) -> u32 {
        self.toks.get(self.pos).map(|(_, p)| p.line).unwrap_or(0)
    }

    fn next(&mut self) -> Option<Tok> {
        let t = self.toks.get(self.pos).map(|(t, _)| t.clone());
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    /// Scans the whole header/body token stream for `extern`/`func`
    /// signatures, recording each name's return type. Ignores bodies
    /// entirely; only the `(...) -> ty` shape is parsed here.
    fn prescan_signatures(&self) -> FxHashMap<String, Ty> {
        let mut map = FxHashMap::default();
        let mut i = 0;
        while i < self.toks.len() {
            let is_header_kw = matches!(&self.toks[i].0, Tok::Ident(kw) if kw == "extern" || kw == "func");
            if is_header_kw {
                if let Some((Tok::Global(name), _)) = self.toks.get(i + 1) {
                    let name = name.clone();
                    let mut j = i + 2;
                    if matches!(self.toks.get(j).map(|(t, _)| t), Some(Tok::Punct('('))) {
                        let mut depth = 0i32;
                        loop {
                            match self.toks.get(j).map(|(t, _)| t) {
                                Some(Tok::Punct('(')) => {
                                    depth += 1;
                                    j += 1;
                                }
                                Some(Tok::Punct(')')) => {
                                    depth -= 1;
                                    j += 1;
                                    if depth == 0 {
                                        break;
                                    }
                                }
                                Some(_) => j += 1,
                                None => break,
                            }
                        }
                        if matches!(self.toks.get(j).map(|(t, _)| t), Some(Tok::Arrow)) {
                            j += 1;
                            if let Some((Tok::Ident(tyname), _)) = self.toks.get(j) {
                                if let Some(ty) = Ty::from_mnemonic(tyname) {
                                    map.insert(name, ty);
                                }
                            }
                        }
                    }
                }
            }
            i += 1;
        }
        map
    }

    fn expect_punct(&mut self, c: char) -> Result<(), ParseError> {
        match self.next() {
            Some(Tok::Punct(p)) if p == c => Ok(()),
            other => Err(ParseError::Syntax { line: self.line(), message: format!("expected '{}', got {:?}", c, other) }),
        }
    }

    fn expect_ident(&mut self) -> Result<String, ParseError> {
        match self.next() {
            Some(Tok::Ident(s)) => Ok(s),
            other => Err(ParseError::Syntax { line: self.line(), message: format!("expected identifier, got {:?}", other) }),
        }
    }

    fn expect_global(&mut self) -> Result<String, ParseError> {
        match self.next() {
            Some(Tok::Global(s)) => Ok(s),
            other => Err(ParseError::Syntax { line: self.line(), message: format!("expected @name, got {:?}", other) }),
        }
    }

    fn expect_temp(&mut self) -> Result<String, ParseError> {
        match self.next() {
            Some(Tok::Temp(s)) => Ok(s),
            other => Err(ParseError::Syntax { line: self.line(), message: format!("expected %temp, got {:?}", other) }),
        }
    }

    /// A label reference, accepting either `^name` or bare `name`.
    fn expect_label_ref(&mut self) -> Result<String, ParseError> {
        match self.next() {
            Some(Tok::Label(s)) => Ok(s),
            Some(Tok::Ident(s)) => Ok(s),
            other => Err(ParseError::Syntax { line: self.line(), message: format!("expected label, got {:?}", other) }),
        }
    }

    fn expect_ty(&mut self) -> Result<Ty, ParseError> {
        let name = self.expect_ident()?;
        Ty::from_mnemonic(&name).ok_or_else(|| ParseError::MalformedLiteral(name))
    }

    /// True at `}` or end of input — a function body boundary.
    fn at_block_end(&self) -> bool {
        matches!(self.peek(), None | Some(Tok::Punct('}')))
    }

    /// True if the cursor sits on the next block's label, i.e. an
    /// identifier or `^label` immediately followed by `(` or `:`.
    fn at_new_block_label(&self) -> bool {
        match self.peek() {
            Some(Tok::Label(_)) => matches!(self.peek_at(1), Some(Tok::Punct(':')) | Some(Tok::Punct('('))),
            Some(Tok::Ident(_)) => matches!(self.peek_at(1), Some(Tok::Punct(':')) | Some(Tok::Punct('('))),
            _ => false,
        }
    }

    fn parse_module(&mut self) -> Result<(), ParseError> {
        loop {
            match self.peek() {
                None => return Ok(()),
                Some(Tok::Ident(kw)) if kw == "target" => {
                    self.next();
                    match self.next() {
                        Some(Tok::Str(s)) => self.b.set_target(s),
                        other => return Err(ParseError::Syntax { line: self.line(), message: format!("expected target string, got {:?}", other) }),
                    }
                }
                Some(Tok::Ident(kw)) if kw == "extern" => {
                    self.next();
                    self.parse_extern()?;
                }
                Some(Tok::Ident(kw)) if kw == "global" => {
                    self.next();
                    self.parse_global()?;
                }
                Some(Tok::Ident(kw)) if kw == "func" => {
                    self.next();
                    self.parse_function()?;
                }
                other => {
                    return Err(ParseError::Syntax { line: self.line(), message: format!("expected top-level item, got {:?}", other) })
                }
            }
        }
    }

    fn parse_extern(&mut self) -> Result<(), ParseError> {
        let name = self.expect_global()?;
        self.expect_punct('(')?;
        let mut params = Vec::new();
        if !matches!(self.peek(), Some(Tok::Punct(')'))) {
            loop {
                params.push(self.expect_ty()?);
                if matches!(self.peek(), Some(Tok::Punct(','))) {
                    self.next();
                } else {
                    break;
                }
            }
        }
        self.expect_punct(')')?;
        if self.next() != Some(Tok::Arrow) {
            return Err(ParseError::Syntax { line: self.line(), message: "expected '->'".into() });
        }
        let ret = self.expect_ty()?;
        self.b
            .declare_extern(&name, ret, params)
            .map_err(|_| ParseError::DuplicateDefinition(name))
    }

    fn parse_global(&mut self) -> Result<(), ParseError> {
        let is_const = if let Some(Tok::Ident(k)) = self.peek() {
            if k == "const" {
                self.next();
                true
            } else {
                false
            }
        } else {
            false
        };
        let ty = self.expect_ty()?;
        let name = self.expect_global()?;
        self.expect_punct('=')?;
        let init = match self.next() {
            Some(Tok::Str(s)) => GlobalInit::Str(s),
            Some(Tok::Int(i)) => GlobalInit::Int(i),
            Some(Tok::Float(f)) => GlobalInit::Float(f),
            Some(Tok::Ident(s)) if s == "zeroinitializer" => GlobalInit::Zero,
            other => return Err(ParseError::MalformedLiteral(format!("{:?}", other))),
        };
        self.b
            .add_global(&name, ty, is_const, init)
            .map_err(|_| ParseError::DuplicateDefinition(name))
    }

    fn parse_params(&mut self) -> Result<Vec<(String, Ty)>, ParseError> {
        self.expect_punct('(')?;
        let mut out = Vec::new();
        if !matches!(self.peek(), Some(Tok::Punct(')'))) {
            loop {
                let name = self.expect_temp()?;
                self.expect_punct(':')?;
                let ty = self.expect_ty()?;
                out.push((name, ty));
                if matches!(self.peek(), Some(Tok::Punct(','))) {
                    self.next();
                } else {
                    break;
                }
            }
        }
        self.expect_punct(')')?;
        Ok(out)
    }

    fn parse_function(&mut self) -> Result<(), ParseError> {
        let name = self.expect_global()?;
        let params = self.parse_params()?;
        if self.next() != Some(Tok::Arrow) {
            return Err(ParseError::Syntax { line: self.line(), message: "expected '->'".into() });
        }
        let ret = self.expect_ty()?;
        self.expect_punct('{')?;

        let f = self
            .b
            .start_function(&name, ret, params.clone())
            .map_err(|_| ParseError::DuplicateDefinition(name.clone()))?;

        // Maps source-level %names (params and per-instruction results) to
        // the TempId actually allocated for them.
        let mut names: FxHashMap<String, TempId> = FxHashMap::default();
        for (i, (pname, _)) in params.iter().enumerate() {
            names.insert(pname.clone(), TempId(i as u32));
        }

        loop {
            if matches!(self.peek(), Some(Tok::Punct('}'))) {
                self.next();
                break;
            }
            self.parse_block(f, &mut names)?;
        }
        Ok(())
    }

    fn parse_block(&mut self, f: FuncId, names: &mut FxHashMap<String, TempId>) -> Result<(), ParseError> {
        let label = self.expect_label_ref()?;
        let params = if matches!(self.peek(), Some(Tok::Punct('('))) {
            self.parse_params()?
        } else {
            Vec::new()
        };
        self.expect_punct(':')?;

        let block = self
            .b
            .create_block(f, &label, params.clone())
            .map_err(|_| ParseError::DuplicateDefinition(label.clone()))?;

        // Block parameters reserve temps in declaration order (done inside
        // `create_block`); read them back so later instructions in this
        // block can resolve the source-level names.
        let assigned: Vec<TempId> = self.b.module().function(f).block(block).params.iter().map(|p| p.temp).collect();
        for ((pname, _), temp) in params.iter().zip(assigned) {
            names.insert(pname.clone(), temp);
        }

        loop {
            if self.at_block_end() || self.at_new_block_label() {
                return Ok(());
            }
            let terminated = self.parse_instruction(f, block, names)?;
            if terminated {
                return Ok(());
            }
        }
    }

    /// Parses one instruction (or terminator) into `block`. Returns `true`
    /// if the instruction emitted was a terminator, ending the block.
    fn parse_instruction(
        &mut self,
        f: FuncId,
        block: BlockId,
        names: &mut FxHashMap<String, TempId>,
    ) -> Result<bool, ParseError> {
        let loc = Some(SourceLoc { file: 0, line: self.line(), column: 0 });

        // optional result binding: one or two %temps followed by '='
        let mut result_names = Vec::new();
        if matches!(self.peek(), Some(Tok::Temp(_))) {
            let save = self.pos;
            let mut names_here = vec![self.expect_temp()?];
            while matches!(self.peek(), Some(Tok::Punct(','))) {
                self.next();
                names_here.push(self.expect_temp()?);
            }
            if matches!(self.peek(), Some(Tok::Punct('='))) {
                self.next();
                result_names = names_here;
            } else {
                self.pos = save;
            }
        }

        let mnemonic = self.expect_ident()?;
        let op = Opcode::from_mnemonic(&mnemonic)
            .ok_or_else(|| ParseError::UnknownOpcode { token: mnemonic.clone() })?;

        let mut operands = Vec::new();
        let mut targets: Vec<Target> = Vec::new();
        let mut case_keys = Vec::new();
        let mut ty = None;
        let mut callee = None;

        use Opcode::*;
        match op {
            ConstNull | EhPop | EhEntry | Trap => {}
            AddrOf | ConstStr => {
                let g = self.expect_global()?;
                callee = Some(self.b.intern(&g));
            }
            Br | EhPush => targets.push(self.parse_target(names)?),
            Cbr => {
                operands.push(self.parse_value(names)?);
                self.expect_punct(',')?;
                targets.push(self.parse_target(names)?);
                self.expect_punct(',')?;
                targets.push(self.parse_target(names)?);
            }
            SwitchI32 => {
                operands.push(self.parse_value(names)?);
                self.expect_punct(',')?;
                targets.push(self.parse_target(names)?);
                while matches!(self.peek(), Some(Tok::Punct(','))) {
                    self.next();
                    let key = match self.next() {
                        Some(Tok::Int(i)) => i as i32,
                        other => return Err(ParseError::MalformedLiteral(format!("{:?}", other))),
                    };
                    if self.next() != Some(Tok::Arrow) {
                        return Err(ParseError::Syntax { line: self.line(), message: "expected '->' in switch case".into() });
                    }
                    case_keys.push(key);
                    targets.push(self.parse_target(names)?);
                }
            }
            ResumeLabel => {
                operands.push(self.parse_value(names)?);
                self.expect_punct(',')?;
                targets.push(self.parse_target(names)?);
            }
            Call => {
                let g = self.expect_global()?;
                ty = self.ret_types.get(&g).copied();
                callee = Some(self.b.intern(&g));
                operands = self.parse_call_args(names)?;
            }
            CallIndirect => {
                let fnval = self.parse_value(names)?;
                let mut args = self.parse_call_args(names)?;
                operands = vec![fnval];
                operands.append(&mut args);
            }
            Load => {
                ty = Some(self.expect_ty()?);
                self.expect_punct(',')?;
                operands.push(self.parse_value(names)?);
            }
            Store => {
                ty = Some(self.expect_ty()?);
                self.expect_punct(',')?;
                operands.push(self.parse_value(names)?);
                self.expect_punct(',')?;
                operands.push(self.parse_value(names)?);
            }
            Zext1 | CastFpToSiRteChk | CastFpToUiRteChk | CastSiNarrowChk | CastUiNarrowChk => {
                ty = Some(self.expect_ty()?);
                self.expect_punct(',')?;
                operands.push(self.parse_value(names)?);
            }
            Ret => {
                if !self.at_block_end() && !self.at_new_block_label() {
                    operands.push(self.parse_value(names)?);
                }
            }
            TrapKind => {
                let k = match self.next() {
                    Some(Tok::Int(i)) => i as i32,
                    other => return Err(ParseError::MalformedLiteral(format!("{:?}", other))),
                };
                case_keys.push(k);
            }
            TrapErr | TrapFromErr => {
                operands.push(self.parse_value(names)?);
            }
            _ => {
                // plain N-ary value-operand opcodes: arithmetic, bitwise,
                // comparisons, conversions without a type operand, alloca,
                // gep, idx.chk, resume.same/next, err.get_*
                loop {
                    operands.push(self.parse_value(names)?);
                    if matches!(self.peek(), Some(Tok::Punct(','))) {
                        self.next();
                    } else {
                        break;
                    }
                }
            }
        }

        let results = if !result_names.is_empty() {
            let tys = self.result_types(op, ty);
            if tys.len() != result_names.len() {
                return Err(ParseError::ArityMismatch { expected: tys.len(), actual: result_names.len() });
            }
            let mut rs = Vec::new();
            for (n, t) in result_names.into_iter().zip(tys) {
                let temp = self.b.reserve_temp(f);
                names.insert(n, temp);
                rs.push((temp, t));
            }
            rs
        } else {
            Vec::new()
        };

        let instr = crate::module::Instruction { op, results, operands, targets, case_keys, ty, callee, loc };
        if op.is_terminator() {
            self.b.module_mut().function_mut(f).block_mut(block).terminator = Some(instr);
            Ok(true)
        } else {
            self.b.module_mut().function_mut(f).block_mut(block).instrs.push(instr);
            Ok(false)
        }
    }

    fn result_types(&self, op: Opcode, aux_ty: Option<Ty>) -> Vec<Ty> {
        use crate::opcode::ResultKind;
        match op.info().result {
            ResultKind::None => vec![],
            ResultKind::Fixed(t) => vec![t],
            ResultKind::InstrType => vec![aux_ty.unwrap_or(Ty::I64)],
            ResultKind::ErrAndToken => vec![Ty::Error, Ty::ResumeTok],
        }
    }

    fn parse_call_args(&mut self, names: &mut FxHashMap<String, TempId>) -> Result<Vec<Value>, ParseError> {
        self.expect_punct('(')?;
        let mut args = Vec::new();
        if !matches!(self.peek(), Some(Tok::Punct(')'))) {
            loop {
                args.push(self.parse_value(names)?);
                if matches!(self.peek(), Some(Tok::Punct(','))) {
                    self.next();
                } else {
                    break;
                }
            }
        }
        self.expect_punct(')')?;
        Ok(args)
    }

    fn parse_target(&mut self, names: &mut FxHashMap<String, TempId>) -> Result<Target, ParseError> {
        let label = self.expect_label_ref()?;
        let sym = self.b.intern(&label);
        let args = if matches!(self.peek(), Some(Tok::Punct('('))) {
            self.parse_call_args(names)?
        } else {
            Vec::new()
        };
        Ok(Target { label: sym, args })
    }

    fn parse_value(&mut self, names: &FxHashMap<String, TempId>) -> Result<Value, ParseError> {
        match self.next() {
            Some(Tok::Temp(n)) => names
                .get(&n)
                .map(|&t| Value::Temp(t))
                .ok_or_else(|| ParseError::UndefinedSymbol(format!("%{}", n))),
            Some(Tok::Int(i)) => Ok(Value::ConstInt(i)),
            Some(Tok::Float(f)) => Ok(Value::ConstFloat(f)),
            Some(Tok::Ident(s)) if s == "true" => Ok(Value::ConstBool(true)),
            Some(Tok::Ident(s)) if s == "false" => Ok(Value::ConstBool(false)),
            Some(Tok::Ident(s)) if s == "null" => Ok(Value::Null),
            Some(Tok::Global(g)) => Ok(Value::GlobalRef(self.b.intern(&g))),
            other => Err(ParseError::Syntax { line: self.line(), message: format!("expected value, got {:?}", other) }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::printer::serialize;

    #[test]
    fn parses_hello_world() {
        let src = r#"il 0.1
extern @Viper.Console.PrintStr(str) -> void
global const str @.msg = "hello"
func @main() -> i64 { entry: %s = const_str @.msg  call @Viper.Console.PrintStr(%s)  ret 0 }
"#;
        let m = parse(src).unwrap();
        assert_eq!(m.version, (0, 1, 0));
        assert_eq!(m.externs.len(), 1);
        assert_eq!(m.globals.len(), 1);
        assert_eq!(m.functions.len(), 1);
        assert_eq!(m.functions[0].blocks.len(), 1);
    }

    #[test]
    fn parses_arithmetic_and_branch() {
        let src = r#"il 0.1
extern @Viper.Console.PrintI64(i64) -> void
func @main() -> i64 { entry:
  %v0 = add 2, 2
  %v1 = scmp_gt %v0, 3
  call @Viper.Console.PrintI64(%v1)
  ret 0 }
"#;
        let m = parse(src).unwrap();
        let f = &m.functions[0];
        assert_eq!(f.blocks[0].instrs.len(), 3);
    }

    #[test]
    fn parses_switch_with_default() {
        let src = r#"il 0.1
extern @Viper.Console.PrintI64(i64) -> void
func @main() -> i64 { entry:
  switch.i32 2, ^d, 1 -> ^one, 2 -> ^two
^one: call @Viper.Console.PrintI64(1) ret 0
^two: call @Viper.Console.PrintI64(2) ret 0
^d:   call @Viper.Console.PrintI64(0) ret 0 }
"#;
        let m = parse(src).unwrap();
        let f = &m.functions[0];
        assert_eq!(f.blocks.len(), 4);
        let term = f.blocks[0].terminator.as_ref().unwrap();
        assert_eq!(term.op, Opcode::SwitchI32);
        assert_eq!(term.case_keys, vec![1, 2]);
    }

    #[test]
    fn unknown_opcode_reports_raw_mnemonic() {
        let src = "il 0.1\nfunc @main() -> i64 { entry: %x = bogus_op 1 ret %x }\n";
        let err = parse(src).unwrap_err();
        match err {
            ParseError::UnknownOpcode { token } => assert_eq!(token, "bogus_op"),
            other => panic!("wrong error: {:?}", other),
        }
    }

    #[test]
    fn call_to_function_declared_later_resolves_its_return_type() {
        let src = r#"il 0.1
func @main() -> i64 { entry: %r = call @helper()  ret %r }
func @helper() -> i64 { entry: ret 7 }
"#;
        let m = parse(src).unwrap();
        let call = &m.functions[0].blocks[0].instrs[0];
        assert_eq!(call.results[0].1, Ty::I64);
    }

    #[test]
    fn roundtrip_reparse_is_stable() {
        let src = r#"il 0.1
extern @Viper.Console.PrintStr(str) -> void
global const str @.msg = "hello"
func @main() -> i64 { entry: %s = const_str @.msg  call @Viper.Console.PrintStr(%s)  ret 0 }
"#;
        let m1 = parse(src).unwrap();
        let text1 = serialize(&m1);
        let m2 = parse(&text1).unwrap();
        let text2 = serialize(&m2);
        assert_eq!(text1, text2);
    }
}
