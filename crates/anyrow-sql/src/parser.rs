use anyrow_core::error::FetchError;
use sqlparser::ast::Expr;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::keywords::Keyword;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::Token;

/// Parses a free-form WHERE fragment: one expression, optionally followed by
/// an `ORDER BY` list. Anything else (a LIMIT, a second statement) is rejected.
pub fn parse_where(text: &str) -> Result<Expr, FetchError> {
    let dialect = PostgreSqlDialect {};
    let mut parser = Parser::new(&dialect)
        .try_with_sql(text)
        .map_err(|e| FetchError::InvalidFilter(format!("where clause: {e}")))?;
    let expr = parser
        .parse_expr()
        .map_err(|e| FetchError::InvalidFilter(format!("where clause: {e}")))?;
    if parser.parse_keywords(&[Keyword::ORDER, Keyword::BY]) {
        parser
            .parse_comma_separated(Parser::parse_order_by_expr)
            .map_err(|e| FetchError::InvalidFilter(format!("where clause: {e}")))?;
    }
    let next = parser.peek_token();
    if next.token != Token::EOF {
        return Err(FetchError::InvalidFilter(format!(
            "where clause: unexpected trailing {}",
            next.token
        )));
    }
    Ok(expr)
}
