//! Textual encoding of the versioned dialect.
//!
//! Each construct has a fixed, canonical token sequence; printing and
//! parsing are exact inverses (byte-for-byte round trip). The parser is a
//! recursive-descent walk over a byte cursor and reports failures with the
//! byte position and the expected token. Constructs the toolchain does not
//! recognize are preserved opaquely: the raw text is captured through one
//! balanced bracket group and reproduced verbatim on print.
//!
//! Canonical forms:
//! - `interval_v1[0:4:1]`
//! - `devices_v1[0, 1, 2, 3]`
//! - `axis_v1<x:4>` / `mesh_v1<axis_v1<x:2>, axis_v1<y:4>>`
//! - `sharding_v1<mesh=devices_v1[0, 1], dims=[x, ?]>`
//! - `priority_v1<2>`
//! - `tensor_v1<2x4xf32>` / `token_v1` / `tuple_v1<token_v1, tensor_v1<4xf32>>`
//! - `shard_v1(tensor_v1<4xf32>, sharding=...) -> tensor_v1<4xf32>`
//! - `all_gather_v1(tensor_v1<8xi64>, axes=[x]) -> tensor_v1<8xi64>`
//! - `fragment_v1(operands=[...], sizes=[1, 1], mesh=...) -> [...]`

use tessera_core::{ConstructKind, Error, Result};

use crate::versioned::{
    AllGatherV1, AllReduceV1, AnyAttr, AnyType, AxisV1, BroadcastV1, DevicesV1, ElementTypeV1,
    FragmentV1, IntervalV1, MeshV1, OpaqueConstruct, PriorityV1, ReshardV1, ShardV1, ShardingV1,
    TensorV1, TokenV1, TupleV1, VersionedAttr, VersionedOp, VersionedType,
};

// ---------------------------------------------------------------------------
// Printing
// ---------------------------------------------------------------------------

pub fn print_attr(attr: &VersionedAttr) -> String {
    match attr {
        VersionedAttr::Interval(i) => {
            format!("{}[{}:{}:{}]", IntervalV1::NAME, i.start, i.end, i.step)
        }
        VersionedAttr::Devices(d) => {
            format!("{}[{}]", DevicesV1::NAME, join_display(&d.ids))
        }
        VersionedAttr::Axis(a) => format!("{}<{}:{}>", AxisV1::NAME, a.name, a.size),
        VersionedAttr::Mesh(m) => {
            let axes: Vec<String> = m
                .axes
                .iter()
                .map(|a| format!("{}<{}:{}>", AxisV1::NAME, a.name, a.size))
                .collect();
            format!("{}<{}>", MeshV1::NAME, axes.join(", "))
        }
        VersionedAttr::Sharding(s) => {
            let dims: Vec<&str> = s
                .dim_axes
                .iter()
                .map(|d| d.as_deref().unwrap_or("?"))
                .collect();
            format!(
                "{}<mesh={}, dims=[{}]>",
                ShardingV1::NAME,
                print_attr(s.mesh.get()),
                dims.join(", ")
            )
        }
        VersionedAttr::Priority(p) => format!("{}<{}>", PriorityV1::NAME, p.value),
        VersionedAttr::Opaque(o) => o.text.clone(),
    }
}

pub fn print_type(ty: &VersionedType) -> String {
    match ty {
        VersionedType::Tensor(t) => {
            let mut body = String::new();
            for dim in &t.shape {
                body.push_str(&dim.to_string());
                body.push('x');
            }
            body.push_str(t.element.token());
            format!("{}<{}>", TensorV1::NAME, body)
        }
        VersionedType::Token(_) => TokenV1::NAME.to_string(),
        VersionedType::Tuple(t) => {
            let elements: Vec<String> = t.elements.iter().map(|e| print_type(e.get())).collect();
            format!("{}<{}>", TupleV1::NAME, elements.join(", "))
        }
        VersionedType::Opaque(o) => o.text.clone(),
    }
}

pub fn print_op(op: &VersionedOp) -> String {
    match op {
        VersionedOp::Shard(s) => print_sharding_op(ShardV1::NAME, &s.input, &s.sharding, &s.result),
        VersionedOp::Reshard(s) => {
            print_sharding_op(ReshardV1::NAME, &s.input, &s.sharding, &s.result)
        }
        VersionedOp::AllGather(g) => {
            print_axes_op(AllGatherV1::NAME, &g.input, &g.gather_axes, &g.result)
        }
        VersionedOp::AllReduce(r) => {
            print_axes_op(AllReduceV1::NAME, &r.input, &r.reduce_axes, &r.result)
        }
        VersionedOp::Fragment(f) => {
            let operands: Vec<String> = f.operands.iter().map(|t| print_type(t.get())).collect();
            let results: Vec<String> = f.results.iter().map(|t| print_type(t.get())).collect();
            format!(
                "{}(operands=[{}], sizes=[{}], mesh={}) -> [{}]",
                FragmentV1::NAME,
                operands.join(", "),
                join_display(&f.segment_sizes),
                print_attr(f.mesh.get()),
                results.join(", ")
            )
        }
        VersionedOp::Broadcast(b) => format!(
            "{}({}) -> {}",
            BroadcastV1::NAME,
            print_type(b.input.get()),
            print_type(b.result.get())
        ),
        VersionedOp::Opaque(o) => o.text.clone(),
    }
}

fn print_sharding_op(name: &str, input: &AnyType, sharding: &AnyAttr, result: &AnyType) -> String {
    format!(
        "{}({}, sharding={}) -> {}",
        name,
        print_type(input.get()),
        print_attr(sharding.get()),
        print_type(result.get())
    )
}

fn print_axes_op(name: &str, input: &AnyType, axes: &[String], result: &AnyType) -> String {
    format!(
        "{}({}, axes=[{}]) -> {}",
        name,
        print_type(input.get()),
        axes.join(", "),
        print_type(result.get())
    )
}

/// True if `s` is a bare identifier token of the grammar. Axis names must
/// satisfy this to be encodable; the upgrade converter enforces it.
pub(crate) fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn join_display<T: std::fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

pub fn parse_attr(text: &str) -> Result<VersionedAttr> {
    let mut cursor = Cursor::new(text);
    let attr = attr_inner(&mut cursor)?;
    cursor.expect_end()?;
    Ok(attr)
}

pub fn parse_type(text: &str) -> Result<VersionedType> {
    let mut cursor = Cursor::new(text);
    let ty = type_inner(&mut cursor)?;
    cursor.expect_end()?;
    Ok(ty)
}

pub fn parse_op(text: &str) -> Result<VersionedOp> {
    let mut cursor = Cursor::new(text);
    let op = op_inner(&mut cursor)?;
    cursor.expect_end()?;
    Ok(op)
}

struct Cursor<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn error(&self, expected: impl Into<String>) -> Error {
        Error::Syntax {
            position: self.pos,
            expected: expected.into(),
        }
    }

    fn eat_str(&mut self, token: &str) -> bool {
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn expect_str(&mut self, token: &str) -> Result<()> {
        if self.eat_str(token) {
            Ok(())
        } else {
            Err(self.error(format!("`{}`", token)))
        }
    }

    fn expect_end(&self) -> Result<()> {
        if self.pos == self.src.len() {
            Ok(())
        } else {
            Err(self.error("end of input"))
        }
    }

    fn parse_ident(&mut self) -> Result<String> {
        let rest = self.rest();
        let mut len = 0;
        for (i, c) in rest.char_indices() {
            let ok = if i == 0 {
                c.is_ascii_alphabetic() || c == '_'
            } else {
                c.is_ascii_alphanumeric() || c == '_'
            };
            if !ok {
                break;
            }
            len = i + c.len_utf8();
        }
        if len == 0 {
            return Err(self.error("identifier"));
        }
        self.pos += len;
        Ok(rest[..len].to_string())
    }

    fn parse_u64(&mut self) -> Result<u64> {
        let rest = self.rest();
        let len = rest.bytes().take_while(|b| b.is_ascii_digit()).count();
        if len == 0 {
            return Err(self.error("integer"));
        }
        let value = rest[..len]
            .parse()
            .map_err(|_| self.error("integer in range"))?;
        self.pos += len;
        Ok(value)
    }

    fn parse_i64(&mut self) -> Result<i64> {
        let negative = self.eat_str("-");
        let magnitude = self.parse_u64()?;
        let value = i64::try_from(magnitude).map_err(|_| self.error("integer in range"))?;
        Ok(if negative { -value } else { value })
    }

    /// Consume one balanced bracket group starting at `<`, `[` or `(` and
    /// return it, delimiters included. Used to preserve opaque payloads.
    fn balanced_group(&mut self) -> Result<&'a str> {
        let rest = self.rest();
        let mut depth = 0usize;
        for (i, c) in rest.char_indices() {
            match c {
                '<' | '[' | '(' => depth += 1,
                '>' | ']' | ')' => {
                    depth = depth
                        .checked_sub(1)
                        .ok_or_else(|| self.error("balanced brackets"))?;
                    if depth == 0 {
                        let end = i + c.len_utf8();
                        self.pos += end;
                        return Ok(&rest[..end]);
                    }
                }
                _ => {
                    if depth == 0 {
                        break;
                    }
                }
            }
        }
        Err(self.error("balanced bracket group"))
    }
}

/// Parse a `", "`-separated list up to (and through) the closing token.
fn parse_list<'a, T>(
    cursor: &mut Cursor<'a>,
    close: &str,
    mut element: impl FnMut(&mut Cursor<'a>) -> Result<T>,
) -> Result<Vec<T>> {
    let mut items = Vec::new();
    if cursor.eat_str(close) {
        return Ok(items);
    }
    loop {
        items.push(element(cursor)?);
        if cursor.eat_str(close) {
            return Ok(items);
        }
        cursor.expect_str(", ")?;
    }
}

fn attr_inner(cursor: &mut Cursor) -> Result<VersionedAttr> {
    let start = cursor.pos;
    let name = cursor.parse_ident()?;
    match name.as_str() {
        IntervalV1::NAME => {
            cursor.expect_str("[")?;
            let interval_start = cursor.parse_i64()?;
            cursor.expect_str(":")?;
            let end = cursor.parse_i64()?;
            cursor.expect_str(":")?;
            let step = cursor.parse_i64()?;
            cursor.expect_str("]")?;
            Ok(VersionedAttr::Interval(IntervalV1 {
                start: interval_start,
                end,
                step,
            }))
        }
        DevicesV1::NAME => {
            cursor.expect_str("[")?;
            let ids = parse_list(cursor, "]", |c| c.parse_u64())?;
            Ok(VersionedAttr::Devices(DevicesV1 { ids }))
        }
        AxisV1::NAME => {
            cursor.expect_str("<")?;
            let axis = axis_body(cursor)?;
            cursor.expect_str(">")?;
            Ok(VersionedAttr::Axis(axis))
        }
        MeshV1::NAME => {
            cursor.expect_str("<")?;
            let axes = parse_list(cursor, ">", |c| {
                c.expect_str(AxisV1::NAME)?;
                c.expect_str("<")?;
                let axis = axis_body(c)?;
                c.expect_str(">")?;
                Ok(axis)
            })?;
            Ok(VersionedAttr::Mesh(MeshV1 { axes }))
        }
        ShardingV1::NAME => {
            cursor.expect_str("<mesh=")?;
            let mesh = attr_inner(cursor)?;
            cursor.expect_str(", dims=[")?;
            let dim_axes = parse_list(cursor, "]", |c| {
                if c.eat_str("?") {
                    Ok(None)
                } else {
                    c.parse_ident().map(Some)
                }
            })?;
            cursor.expect_str(">")?;
            Ok(VersionedAttr::Sharding(ShardingV1 {
                mesh: AnyAttr::new(mesh),
                dim_axes,
            }))
        }
        PriorityV1::NAME => {
            cursor.expect_str("<")?;
            let value = cursor.parse_u64()?;
            cursor.expect_str(">")?;
            Ok(VersionedAttr::Priority(PriorityV1 { value }))
        }
        _ => opaque_inner(cursor, ConstructKind::Attr, start, name).map(VersionedAttr::Opaque),
    }
}

fn axis_body(cursor: &mut Cursor) -> Result<AxisV1> {
    let name = cursor.parse_ident()?;
    cursor.expect_str(":")?;
    let size = cursor.parse_u64()?;
    Ok(AxisV1 { name, size })
}

fn type_inner(cursor: &mut Cursor) -> Result<VersionedType> {
    let start = cursor.pos;
    let name = cursor.parse_ident()?;
    match name.as_str() {
        TensorV1::NAME => {
            cursor.expect_str("<")?;
            let mut shape = Vec::new();
            // Dims may be negative (dynamic-size markers); the element
            // token always starts with a letter.
            while cursor.peek().map_or(false, |c| c.is_ascii_digit() || c == '-') {
                shape.push(cursor.parse_i64()?);
                cursor.expect_str("x")?;
            }
            let token = cursor.parse_ident()?;
            let element =
                ElementTypeV1::from_token(&token).ok_or_else(|| cursor.error("element type"))?;
            cursor.expect_str(">")?;
            Ok(VersionedType::Tensor(TensorV1 { shape, element }))
        }
        TokenV1::NAME => Ok(VersionedType::Token(TokenV1)),
        TupleV1::NAME => {
            cursor.expect_str("<")?;
            let elements = parse_list(cursor, ">", |c| type_inner(c).map(AnyType::new))?;
            Ok(VersionedType::Tuple(TupleV1 { elements }))
        }
        _ => opaque_inner(cursor, ConstructKind::Type, start, name).map(VersionedType::Opaque),
    }
}

fn op_inner(cursor: &mut Cursor) -> Result<VersionedOp> {
    let name = cursor.parse_ident()?;
    match name.as_str() {
        ShardV1::NAME => {
            let (input, sharding, result) = sharding_op_body(cursor)?;
            Ok(VersionedOp::Shard(ShardV1 {
                input,
                sharding,
                result,
            }))
        }
        ReshardV1::NAME => {
            let (input, sharding, result) = sharding_op_body(cursor)?;
            Ok(VersionedOp::Reshard(ReshardV1 {
                input,
                sharding,
                result,
            }))
        }
        AllGatherV1::NAME => {
            let (input, axes, result) = axes_op_body(cursor)?;
            Ok(VersionedOp::AllGather(AllGatherV1 {
                input,
                gather_axes: axes,
                result,
            }))
        }
        AllReduceV1::NAME => {
            let (input, axes, result) = axes_op_body(cursor)?;
            Ok(VersionedOp::AllReduce(AllReduceV1 {
                input,
                reduce_axes: axes,
                result,
            }))
        }
        FragmentV1::NAME => {
            cursor.expect_str("(operands=[")?;
            let operands = parse_list(cursor, "]", |c| type_inner(c).map(AnyType::new))?;
            cursor.expect_str(", sizes=[")?;
            let segment_sizes = parse_list(cursor, "]", |c| c.parse_u64())?;
            cursor.expect_str(", mesh=")?;
            let mesh = attr_inner(cursor)?;
            cursor.expect_str(") -> [")?;
            let results = parse_list(cursor, "]", |c| type_inner(c).map(AnyType::new))?;
            Ok(VersionedOp::Fragment(FragmentV1 {
                operands,
                segment_sizes,
                mesh: AnyAttr::new(mesh),
                results,
            }))
        }
        BroadcastV1::NAME => {
            cursor.expect_str("(")?;
            let input = type_inner(cursor)?;
            cursor.expect_str(") -> ")?;
            let result = type_inner(cursor)?;
            Ok(VersionedOp::Broadcast(BroadcastV1 {
                input: AnyType::new(input),
                result: AnyType::new(result),
            }))
        }
        _ => {
            // Unknown op: preserve the whole line opaquely.
            let text = format!("{}{}", name, cursor.rest());
            cursor.pos = cursor.src.len();
            Ok(VersionedOp::Opaque(OpaqueConstruct {
                kind: ConstructKind::Op,
                name,
                text,
            }))
        }
    }
}

fn sharding_op_body(cursor: &mut Cursor) -> Result<(AnyType, AnyAttr, AnyType)> {
    cursor.expect_str("(")?;
    let input = type_inner(cursor)?;
    cursor.expect_str(", sharding=")?;
    let sharding = attr_inner(cursor)?;
    cursor.expect_str(") -> ")?;
    let result = type_inner(cursor)?;
    Ok((
        AnyType::new(input),
        AnyAttr::new(sharding),
        AnyType::new(result),
    ))
}

fn axes_op_body(cursor: &mut Cursor) -> Result<(AnyType, Vec<String>, AnyType)> {
    cursor.expect_str("(")?;
    let input = type_inner(cursor)?;
    cursor.expect_str(", axes=[")?;
    let axes = parse_list(cursor, "]", |c| c.parse_ident())?;
    cursor.expect_str(") -> ")?;
    let result = type_inner(cursor)?;
    Ok((AnyType::new(input), axes, AnyType::new(result)))
}

/// Capture an unrecognized attribute or type as raw text: the name plus, if
/// present, one balanced bracket payload.
fn opaque_inner(
    cursor: &mut Cursor,
    kind: ConstructKind,
    start: usize,
    name: String,
) -> Result<OpaqueConstruct> {
    if matches!(cursor.peek(), Some('<') | Some('[')) {
        cursor.balanced_group()?;
    }
    Ok(OpaqueConstruct {
        kind,
        name,
        text: cursor.src[start..cursor.pos].to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attr_round_trip(text: &str) -> VersionedAttr {
        let attr = parse_attr(text).unwrap();
        assert_eq!(print_attr(&attr), text);
        attr
    }

    fn type_round_trip(text: &str) -> VersionedType {
        let ty = parse_type(text).unwrap();
        assert_eq!(print_type(&ty), text);
        ty
    }

    fn op_round_trip(text: &str) -> VersionedOp {
        let op = parse_op(text).unwrap();
        assert_eq!(print_op(&op), text);
        op
    }

    #[test]
    fn test_interval_prints_canonically() {
        let attr = VersionedAttr::Interval(IntervalV1 {
            start: 0,
            end: 4,
            step: 1,
        });
        let text = print_attr(&attr);
        assert_eq!(text, "interval_v1[0:4:1]");
        assert!(text.ends_with("[0:4:1]"));
    }

    #[test]
    fn test_interval_parse_yields_the_same_triple() {
        match attr_round_trip("interval_v1[0:4:1]") {
            VersionedAttr::Interval(i) => {
                assert_eq!((i.start, i.end, i.step), (0, 4, 1));
            }
            other => panic!("unexpected construct {:?}", other),
        }
    }

    #[test]
    fn test_interval_missing_step_is_a_syntax_error() {
        let err = parse_attr("interval_v1[0:4]").unwrap_err();
        match err {
            Error::Syntax { position, expected } => {
                assert_eq!(position, 15);
                assert_eq!(expected, "`:`");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_negative_interval_bounds() {
        match attr_round_trip("interval_v1[-4:4:2]") {
            VersionedAttr::Interval(i) => assert_eq!(i.start, -4),
            other => panic!("unexpected construct {:?}", other),
        }
    }

    #[test]
    fn test_devices_prints_canonically() {
        let attr = VersionedAttr::Devices(DevicesV1 {
            ids: vec![0, 1, 2, 3],
        });
        assert_eq!(print_attr(&attr), "devices_v1[0, 1, 2, 3]");
        attr_round_trip("devices_v1[0, 1, 2, 3]");
        attr_round_trip("devices_v1[]");
    }

    #[test]
    fn test_attr_round_trips() {
        attr_round_trip("axis_v1<x:4>");
        attr_round_trip("mesh_v1<axis_v1<x:2>, axis_v1<y:4>>");
        attr_round_trip("mesh_v1<>");
        attr_round_trip("sharding_v1<mesh=devices_v1[0, 1], dims=[x, ?]>");
        attr_round_trip("sharding_v1<mesh=mesh_v1<axis_v1<x:2>>, dims=[x]>");
        attr_round_trip("priority_v1<2>");
    }

    #[test]
    fn test_type_round_trips() {
        type_round_trip("tensor_v1<2x4xf32>");
        type_round_trip("tensor_v1<f64>");
        type_round_trip("token_v1");
        type_round_trip("tuple_v1<token_v1, tensor_v1<4xi1>>");
        type_round_trip("tuple_v1<>");
    }

    #[test]
    fn test_dynamic_dims_round_trip() {
        match type_round_trip("tensor_v1<-1x4xf32>") {
            VersionedType::Tensor(t) => assert_eq!(t.shape, vec![-1, 4]),
            other => panic!("unexpected construct {:?}", other),
        }
        type_round_trip("tensor_v1<-1xf32>");
    }

    #[test]
    fn test_identifier_predicate_matches_the_grammar() {
        assert!(is_identifier("x"));
        assert!(is_identifier("_batch0"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("?"));
        assert!(!is_identifier("0x"));
        assert!(!is_identifier("x:2>, axis_v1<y"));
    }

    #[test]
    fn test_op_round_trips() {
        op_round_trip(
            "shard_v1(tensor_v1<4xf32>, \
             sharding=sharding_v1<mesh=devices_v1[0, 1], dims=[x]>) -> tensor_v1<4xf32>",
        );
        op_round_trip("all_gather_v1(tensor_v1<8xi64>, axes=[x, y]) -> tensor_v1<8xi64>");
        op_round_trip("all_reduce_v1(tensor_v1<8xi64>, axes=[]) -> tensor_v1<8xi64>");
        op_round_trip(
            "fragment_v1(operands=[tensor_v1<4xf32>, token_v1], sizes=[1, 1], \
             mesh=mesh_v1<axis_v1<x:2>>) -> [tensor_v1<4xf32>]",
        );
        op_round_trip("broadcast_v1(tensor_v1<4xf32>) -> tensor_v1<4xf32>");
    }

    #[test]
    fn test_unknown_attr_is_preserved_opaquely() {
        let text = "axis_list_v2<[a:1], [b:2]>";
        let attr = parse_attr(text).unwrap();
        match &attr {
            VersionedAttr::Opaque(o) => {
                assert_eq!(o.name, "axis_list_v2");
                assert_eq!(o.text, text);
            }
            other => panic!("unexpected construct {:?}", other),
        }
        assert_eq!(print_attr(&attr), text);
    }

    #[test]
    fn test_unknown_op_is_preserved_opaquely() {
        let text = "all_to_all_v2(tensor_v1<4xf32>, axes=[x]) -> tensor_v1<4xf32>";
        let op = parse_op(text).unwrap();
        match &op {
            VersionedOp::Opaque(o) => assert_eq!(o.name, "all_to_all_v2"),
            other => panic!("unexpected construct {:?}", other),
        }
        assert_eq!(print_op(&op), text);
    }

    #[test]
    fn test_trailing_garbage_is_rejected() {
        assert!(parse_attr("priority_v1<2>!").is_err());
        assert!(parse_type("token_v1 ").is_err());
    }

    #[test]
    fn test_unbalanced_opaque_payload_is_rejected() {
        let err = parse_attr("mystery_v2<[a:1]").unwrap_err();
        assert!(matches!(err, Error::Syntax { .. }));
    }
}
