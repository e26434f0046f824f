//! Normalização de descrições de produto e códigos fiscais.

/// Remove acentos do português e converte para minúsculas.
pub fn fold(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' | 'Á' | 'À' | 'Â' | 'Ã' | 'Ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' | 'É' | 'È' | 'Ê' | 'Ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' | 'Í' | 'Ì' | 'Î' | 'Ï' => 'i',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' | 'Ó' | 'Ò' | 'Ô' | 'Õ' | 'Ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' | 'Ú' | 'Ù' | 'Û' | 'Ü' => 'u',
            'ç' | 'Ç' => 'c',
            other => other.to_ascii_lowercase(),
        })
        .collect()
}

/// Quebra a descrição em tokens minúsculos sem acento. `%` é preservado
/// porque marca concentração.
pub fn tokens(text: &str) -> Vec<String> {
    fold(text)
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '%'))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Separa um token como `500mg` em número e unidade.
pub fn split_measure(token: &str) -> Option<(&str, &str)> {
    let digits = token
        .char_indices()
        .take_while(|(_, c)| c.is_ascii_digit() || *c == ',' || *c == '.')
        .last()
        .map(|(i, c)| i + c.len_utf8())?;
    if !token.as_bytes()[0].is_ascii_digit() {
        return None;
    }
    let (number, unit) = token.split_at(digits);
    Some((number, unit))
}

/// Mantém só os dígitos de um código fiscal (`3004.90.69` → `30049069`).
pub fn digits(code: &str) -> String {
    code.chars().filter(char::is_ascii_digit).collect()
}
