//! Instruction prompt for the synthesis stage.
//!
//! Callers can override it via [`crate::config::PipelineConfig::prompt`];
//! the OCR table is always appended after the instructions.

/// Default instructions sent ahead of the OCR table.
pub const EXTRACTION_PROMPT: &str = r#"You are an invoice data extraction assistant. Your task is to extract structured data from the OCR output of an invoice.

The OCR output is a TSV (tab-separated values) table with the columns:
level, page_num, block_num, par_num, line_num, word_num, left, top, width, height, conf, text

Read the "text" column to understand the invoice. The positional columns tell you where each word sits on the page and help you rebuild lines and table rows.

Return the following information as valid JSON:

{
  "invoice_number": "string - the invoice number/ID",
  "invoice_date": "string - the issue date (YYYY-MM-DD if possible)",
  "due_date": "string - the payment due date (YYYY-MM-DD if possible)",
  "total_amount": number - the final amount to pay,
  "line_items": [
    {
      "description": "string - description of the item or service",
      "quantity": number - quantity ordered,
      "unit_price": number - price per unit,
      "total_price": number - total for this line
    }
  ]
}

Rules:
- Return ONLY the JSON object, no markdown formatting or explanation
- If a field cannot be determined, use "" for strings and 0 for numbers
- Amounts are plain numbers without currency symbols or thousands separators
- Include every line item found in the invoice

Here is the OCR TSV data:

"#;

/// Build the full request: instructions followed by the table.
pub fn build_prompt(instructions: Option<&str>, table: &str) -> String {
    let instructions = instructions.unwrap_or(EXTRACTION_PROMPT);
    let mut prompt = String::with_capacity(instructions.len() + table.len());
    prompt.push_str(instructions);
    prompt.push_str(table);
    prompt
}
