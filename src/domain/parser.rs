//! Domain expression parser
//!
//! Built from nom combinators. Grammar (case-insensitive keywords):
//!
//! ```text
//! expr      := and_expr (OR and_expr)*
//! and_expr  := unary (AND unary)*
//! unary     := NOT unary | '(' expr ')' | predicate
//! predicate := operand cmp operand
//!            | operand [NOT] IN '(' literal (',' literal)* ')'
//!            | operand [NOT] BETWEEN operand AND operand
//!            | operand IS [NOT] NULL
//! operand   := literal | column
//! ```

use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while},
    character::complete::{char, multispace0, satisfy},
    combinator::{map, map_res, not, opt, recognize, verify},
    error::{Error, ErrorKind},
    multi::{many0, separated_list1},
    number::complete::recognize_float,
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};

use super::ast::{CompareOp, DomainExpr, Literal, Operand};

const RESERVED: [&str; 9] = ["AND", "OR", "NOT", "IN", "BETWEEN", "IS", "NULL", "TRUE", "FALSE"];

/// Parse an expression string into an unresolved tree
pub fn parse(input: &str) -> Result<DomainExpr, String> {
    if input.trim().is_empty() {
        return Err("empty expression".to_string());
    }
    let (rest, expr) = terminated(or_expr, multispace0)(input).map_err(|e| match e {
        nom::Err::Error(err) | nom::Err::Failure(err) => describe(input, err.input),
        nom::Err::Incomplete(_) => "incomplete expression".to_string(),
    })?;
    if !rest.is_empty() {
        return Err(describe(input, rest));
    }
    Ok(expr)
}

fn describe(input: &str, at: &str) -> String {
    let at = at.trim();
    if at.is_empty() {
        return "expression ended where a value or operator was expected".to_string();
    }
    let pos = input.trim_end().len() - at.len();
    format!("unexpected input '{}' at position {}", at, pos)
}

fn or_expr(input: &str) -> IResult<&str, DomainExpr> {
    let (input, first) = and_expr(input)?;
    let (input, rest) = many0(preceded(tuple((multispace0, keyword("OR"), multispace0)), and_expr))(input)?;
    Ok((input, rest.into_iter().fold(first, DomainExpr::or)))
}

fn and_expr(input: &str) -> IResult<&str, DomainExpr> {
    let (input, first) = unary(input)?;
    let (input, rest) = many0(preceded(tuple((multispace0, keyword("AND"), multispace0)), unary))(input)?;
    Ok((input, rest.into_iter().fold(first, DomainExpr::and)))
}

fn unary(input: &str) -> IResult<&str, DomainExpr> {
    let (input, _) = multispace0(input)?;
    alt((
        map(preceded(pair(keyword("NOT"), multispace0), unary), DomainExpr::negate),
        delimited(pair(char('('), multispace0), or_expr, pair(multispace0, char(')'))),
        predicate,
    ))(input)
}

fn predicate(input: &str) -> IResult<&str, DomainExpr> {
    let (input, left) = operand(input)?;
    let (input, _) = multispace0(input)?;

    if let Ok((rest, (negated, values))) = in_list(input) {
        return Ok((rest, DomainExpr::InList { operand: left, values, negated }));
    }
    if let Ok((rest, (negated, low, high))) = between(input) {
        return Ok((rest, DomainExpr::Between { operand: left, low, high, negated }));
    }
    if let Ok((rest, negated)) = is_null(input) {
        return Ok((rest, DomainExpr::IsNull { operand: left, negated }));
    }

    let (rest, (op, right)) = pair(terminated(compare_op, multispace0), operand)(input)?;
    match (left, right) {
        (Operand::Literal(_), Operand::Literal(_)) => Err(nom::Err::Failure(Error::new(input, ErrorKind::Verify))),
        // keep the column on the left
        (left @ Operand::Literal(_), right) => Ok((
            rest,
            DomainExpr::Compare {
                left: right,
                op: op.flipped(),
                right: left,
            },
        )),
        (left, right) => Ok((rest, DomainExpr::Compare { left, op, right })),
    }
}

fn negation(input: &str) -> IResult<&str, bool> {
    map(opt(terminated(keyword("NOT"), multispace0)), |not| not.is_some())(input)
}

fn in_list(input: &str) -> IResult<&str, (bool, Vec<Literal>)> {
    let (input, negated) = negation(input)?;
    let (input, _) = pair(keyword("IN"), multispace0)(input)?;
    let (input, values) = delimited(
        pair(char('('), multispace0),
        separated_list1(tuple((multispace0, char(','), multispace0)), literal),
        pair(multispace0, char(')')),
    )(input)?;
    Ok((input, (negated, values)))
}

fn between(input: &str) -> IResult<&str, (bool, Operand, Operand)> {
    let (input, negated) = negation(input)?;
    let (input, _) = pair(keyword("BETWEEN"), multispace0)(input)?;
    let (input, low) = operand(input)?;
    let (input, _) = tuple((multispace0, keyword("AND"), multispace0))(input)?;
    let (input, high) = operand(input)?;
    Ok((input, (negated, low, high)))
}

fn is_null(input: &str) -> IResult<&str, bool> {
    let (input, _) = pair(keyword("IS"), multispace0)(input)?;
    let (input, negated) = negation(input)?;
    let (input, _) = keyword("NULL")(input)?;
    Ok((input, negated))
}

fn compare_op(input: &str) -> IResult<&str, CompareOp> {
    alt((
        map(tag("=="), |_| CompareOp::Eq),
        map(tag("!="), |_| CompareOp::NotEq),
        map(tag("<>"), |_| CompareOp::NotEq),
        map(tag("<="), |_| CompareOp::LtEq),
        map(tag(">="), |_| CompareOp::GtEq),
        map(tag("="), |_| CompareOp::Eq),
        map(tag("<"), |_| CompareOp::Lt),
        map(tag(">"), |_| CompareOp::Gt),
    ))(input)
}

fn operand(input: &str) -> IResult<&str, Operand> {
    alt((
        map(literal, Operand::Literal),
        map(identifier, |name| Operand::Column(name.to_string())),
    ))(input)
}

fn literal(input: &str) -> IResult<&str, Literal> {
    alt((
        map(string_literal, |s| Literal::Str(s.to_string())),
        map(keyword("TRUE"), |_| Literal::Bool(true)),
        map(keyword("FALSE"), |_| Literal::Bool(false)),
        number,
    ))(input)
}

// Integers stay integers so they compare exactly against code columns
fn number(input: &str) -> IResult<&str, Literal> {
    map_res(recognize_float, |text: &str| {
        if text.contains(['.', 'e', 'E']) {
            text.parse::<f64>().map(Literal::Float).map_err(|e| e.to_string())
        } else {
            text.parse::<i64>().map(Literal::Int).map_err(|e| e.to_string())
        }
    })(input)
}

fn string_literal(input: &str) -> IResult<&str, &str> {
    alt((
        delimited(char('\''), take_while(|c| c != '\''), char('\'')),
        delimited(char('"'), take_while(|c| c != '"'), char('"')),
    ))(input)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    verify(
        recognize(pair(
            satisfy(|c| c.is_ascii_alphabetic() || c == '_'),
            take_while(is_ident_char),
        )),
        |word: &str| !RESERVED.iter().any(|kw| kw.eq_ignore_ascii_case(word)),
    )(input)
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Case-insensitive keyword that does not run into a following identifier
fn keyword(word: &'static str) -> impl FnMut(&str) -> IResult<&str, &str> {
    move |input: &str| terminated(tag_no_case(word), not(satisfy(is_ident_char)))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col_op(name: &str, op: CompareOp, value: Literal) -> DomainExpr {
        DomainExpr::compare(name, op, value)
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let expr = parse("A == 1 OR B == 2 AND C == 3").unwrap();
        let expected = col_op("A", CompareOp::Eq, Literal::Int(1)).or(
            col_op("B", CompareOp::Eq, Literal::Int(2)).and(col_op("C", CompareOp::Eq, Literal::Int(3))),
        );
        assert_eq!(expr, expected);
    }

    #[test]
    fn test_parentheses_and_not() {
        let expr = parse("NOT (SPCD IN (131, 110) OR DIA < 5)").unwrap();
        match expr {
            DomainExpr::Not(inner) => assert!(matches!(*inner, DomainExpr::Or(_, _))),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_between_and_is_null() {
        let expr = parse("FORTYPCD BETWEEN 160 AND 169 AND SICOND IS NOT NULL").unwrap();
        let cols = expr.columns();
        assert!(cols.contains("FORTYPCD"));
        assert!(cols.contains("SICOND"));
        match expr {
            DomainExpr::And(lhs, rhs) => {
                assert!(matches!(*lhs, DomainExpr::Between { negated: false, .. }));
                assert!(matches!(*rhs, DomainExpr::IsNull { negated: true, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_not_in_and_negative_literals() {
        let expr = parse("ELEV NOT IN (-10, 20.5)").unwrap();
        assert_eq!(
            expr,
            DomainExpr::InList {
                operand: Operand::Column("ELEV".into()),
                values: vec![Literal::Int(-10), Literal::Float(20.5)],
                negated: true,
            }
        );
    }

    #[test]
    fn test_literal_on_left_is_flipped() {
        assert_eq!(
            parse("5.0 <= DIA").unwrap(),
            col_op("DIA", CompareOp::GtEq, Literal::Float(5.0))
        );
    }

    #[test]
    fn test_sql_operator_spellings() {
        assert_eq!(parse("STATUSCD = 1").unwrap(), parse("STATUSCD == 1").unwrap());
        assert_eq!(parse("STATUSCD <> 1").unwrap(), parse("STATUSCD != 1").unwrap());
        assert_eq!(
            parse("owncd='private' and isforest = true").unwrap(),
            col_op("owncd", CompareOp::Eq, Literal::Str("private".into()))
                .and(col_op("isforest", CompareOp::Eq, Literal::Bool(true)))
        );
    }

    #[test]
    fn test_keywords_inside_column_names() {
        // INVYR starts with IN, ORIGIN with OR, NOTES with NOT
        let expr = parse("INVYR >= 2015 AND ORIGIN == 1 OR NOTES IS NULL").unwrap();
        let cols: Vec<String> = expr.columns().into_iter().collect();
        assert_eq!(cols, vec!["INVYR", "NOTES", "ORIGIN"]);
    }

    #[test]
    fn test_parse_failures() {
        for bad in [
            "",
            "DIA >=",
            "DIA >= 5 AND",
            "(DIA > 5",
            "DIA == NULL",
            "SPCD IN ()",
            "DIA 5",
            "1 == 2",
            "DIA > 5 extra",
            "SICOND IS 5",
            "DIA >> 5",
        ] {
            assert!(parse(bad).is_err(), "expected parse failure for {:?}", bad);
        }
    }

    #[test]
    fn test_error_reports_position() {
        let err = parse("DIA > 5 extra").unwrap_err();
        assert!(err.contains("position 8"), "{}", err);
    }
}
